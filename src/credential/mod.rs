//!
//! Anonymous credential boundary.
//!
//! The blind-signature cryptosystem lives outside this crate; these traits
//! describe the three primitive operations the flows need (request, finalize,
//! submit) over credentials serialized as opaque strings. The
//! [`WorkerCredentialEngine`] wrapper runs any engine off the main task with
//! message-number correlation.

/// Off-task execution of credential primitives
mod worker;

pub use worker::WorkerCredentialEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pre-issuance credential material: the holder identifier bound to the
/// registrar's verification key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSeed {
	pub id: String,
	#[serde(rename = "registrarVK")]
	pub registrar_vk: String,
}

/// Result of a credential request: the updated opaque credential plus the
/// proof to send to the registrar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedCredential {
	pub credential: String,
	pub proof: String,
}

/// Error types for credential primitive operations
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
	#[error("credential operation failed: {0}")]
	Primitive(String),

	#[error("credential worker stopped")]
	WorkerGone,
}

/// The three cryptographic primitive operations for anonymous credentials.
///
/// Each may fail with a [`CredentialError`]; failures surface to the caller
/// without local recovery.
#[async_trait]
pub trait CredentialEngine: Send + Sync {
	/// Produce the registration proof for a fresh credential.
	async fn request(&self, seed: &CredentialSeed) -> Result<RequestedCredential, CredentialError>;

	/// Finalize a credential from the registrar's verification response,
	/// returning the serialized issued credential.
	async fn finalize(
		&self,
		credential: &str,
		verification: &Value,
	) -> Result<String, CredentialError>;

	/// Build an anonymous submission proof against a surveyor's parameters.
	async fn submit(
		&self,
		credential: &str,
		surveyor: &Value,
		data: &Value,
	) -> Result<String, CredentialError>;
}
