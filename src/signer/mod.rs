//!
//! Wallet signing boundary.
//!
//! Key management and the funding transaction format live outside this crate;
//! the flows only need keychain creation at registration time and a signature
//! over the unsigned transaction the ledger offers at reconcile time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Key material backing a provisioned wallet.
///
/// The secret half is opaque to this crate and round-trips through persisted
/// state unchanged; only the public half is ever sent to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keychain {
	pub public_key: String,
	pub material: String,
}

#[derive(Debug, Error)]
pub enum SigningError {
	#[error("keychain creation failed: {0}")]
	Keychain(String),

	#[error("signing failed: {0}")]
	Sign(String),

	#[error("insufficient funds: {0}")]
	InsufficientFunds(String),
}

/// Creates keychains and signs funding transactions.
pub trait WalletSigner: Send + Sync {
	fn create_keychain(&self) -> Result<Keychain, SigningError>;

	fn sign(&self, unsigned_tx: &Value, keychain: &Keychain) -> Result<Value, SigningError>;
}
