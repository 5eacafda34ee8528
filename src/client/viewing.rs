//!
//! Viewing registration: the per-cycle anonymous identity used solely to
//! obtain voting tokens, unlinkable to the persona that funded the cycle.

use super::protocol::{RegistrarParams, ViewingReceipt};
use super::{Client, ClientError, SHORT_DELAY_MS, SyncOutcome};
use crate::credential::CredentialSeed;
use crate::transport::Request;
use serde_json::json;
use tracing::info;

impl Client {
	/// Issue the viewing credential for `viewing_id` and attach it, together
	/// with the granted ballot token batch, to the matching transaction.
	///
	/// The transaction must already exist — reconcile creates it before a
	/// viewing can register against it — so a missing one is an invariant
	/// violation, not a retryable condition.
	pub(crate) async fn register_viewing(
		&mut self,
		viewing_id: &str,
	) -> Result<SyncOutcome, ClientError> {
		if !self
			.state
			.transactions
			.iter()
			.any(|tx| tx.viewing_id == viewing_id)
		{
			return Err(ClientError::NotFound(viewing_id.to_string()));
		}

		let params: RegistrarParams = serde_json::from_value(
			self.transport
				.roundtrip(Request::get("/v2/registrar/viewing"))
				.await?,
		)?;

		let seed = CredentialSeed {
			id: viewing_id.to_string(),
			registrar_vk: params.registrar_vk,
		};
		let requested = self.credentials.request(&seed).await?;

		let receipt: ViewingReceipt = serde_json::from_value(
			self.transport
				.roundtrip(Request::post(
					format!("/v2/registrar/viewing/{viewing_id}"),
					json!({ "proof": requested.proof }),
				))
				.await?,
		)?;

		let credential = self
			.credentials
			.finalize(&requested.credential, &receipt.verification)
			.await?;

		let transaction = self
			.state
			.transactions
			.iter_mut()
			.find(|tx| tx.viewing_id == viewing_id)
			.ok_or_else(|| ClientError::NotFound(viewing_id.to_string()))?;

		transaction.count = receipt.surveyor_ids.len() as u32;
		transaction.votes = 0;
		transaction.surveyor_ids = Some(receipt.surveyor_ids);
		transaction.credential = Some(credential);

		info!(viewing_id, count = transaction.count, "viewing registered");
		Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
	}
}
