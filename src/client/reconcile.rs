//!
//! Periodic funding: surveyor acquisition, the wallet quote with refreshed
//! exchange rates, and signing plus submission of the contribution
//! transaction.
//!
//! `reconcile` only opens the cycle; the engine drives the remainder through
//! `advance_reconcile` on subsequent sync calls. The `current_reconcile`
//! slot is the process-wide single-flight guard: acquired here, released on
//! successful submission.

use super::protocol::{SubmitReceipt, WalletQuote};
use super::{Client, ClientError, SHORT_DELAY_MS, SyncOutcome};
use crate::state::{Contribution, CurrentReconcile, Fiat, PaymentInfo, SurveyorInfo, Transaction};
use crate::transport::Request;
use crate::utils::now_ms;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound for the jittered waits used while a reconcile cannot make
/// progress (already in flight, stale surveyor, unfunded wallet).
const RECONCILE_JITTER_MS: u64 = 10 * 60 * 1000;

impl Client {
	/// Open the funding cycle for `viewing_id`.
	///
	/// Not-yet-due and already-in-flight conditions come back as a delay
	/// through the success channel; a malformed `viewing_id` is a caller
	/// bug and errors immediately.
	pub async fn reconcile(&mut self, viewing_id: &str) -> Result<SyncOutcome, ClientError> {
		let properties = self.state.properties.as_ref().ok_or(ClientError::Incomplete)?;
		let stamp = self.state.reconcile_stamp.ok_or(ClientError::Incomplete)?;

		if viewing_id.is_empty() {
			return Err(ClientError::MissingParameter("viewing_id"));
		}
		if properties.setting.requires_viewing_id() {
			Uuid::parse_str(viewing_id).map_err(|err| ClientError::InvalidParameter {
				name: "viewing_id",
				reason: err.to_string(),
			})?;
		}
		let payment_id = properties.wallet.payment_id.clone();

		let now = now_ms();
		if stamp > now {
			debug!(delay_ms = stamp - now, "reconcile not yet due");
			return Ok(SyncOutcome::step(false, stamp - now));
		}
		if self.state.current_reconcile.is_some() {
			let delay = self.jitter_ms(RECONCILE_JITTER_MS)?;
			debug!(delay_ms = delay, "reconcile already in flight");
			return Ok(SyncOutcome::step(false, delay));
		}

		let body = self
			.transport
			.roundtrip(Request::get(format!(
				"/v2/surveyor/contribution/current/{payment_id}"
			)))
			.await?;
		let surveyor_info: SurveyorInfo = serde_json::from_value(body)?;

		if self
			.state
			.transactions
			.iter()
			.any(|tx| tx.surveyor_id == surveyor_info.surveyor_id)
		{
			// The service has not rotated the funding surveyor yet; funding
			// the same one twice would link two cycles together.
			let delay = self.jitter_ms(RECONCILE_JITTER_MS)?;
			warn!(
				surveyor_id = %surveyor_info.surveyor_id,
				delay_ms = delay,
				"contribution surveyor already used, awaiting rotation"
			);
			return Ok(SyncOutcome::step(false, delay));
		}

		info!(viewing_id, surveyor_id = %surveyor_info.surveyor_id, "reconcile started");
		self.state.current_reconcile = Some(CurrentReconcile {
			viewing_id: viewing_id.to_string(),
			surveyor_info,
			timestamp: now,
		});
		Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
	}

	/// Drive the in-flight reconcile one step further (sync priority 5).
	pub(crate) async fn advance_reconcile(&mut self, now: u64) -> Result<SyncOutcome, ClientError> {
		let current = self
			.state
			.current_reconcile
			.clone()
			.ok_or(ClientError::Incomplete)?;
		let properties = self.state.properties.as_ref().ok_or(ClientError::Incomplete)?;
		let payment_id = properties.wallet.payment_id.clone();
		let address = properties.wallet.address.clone();
		let keychain = properties.wallet.keychain.clone();
		let fee = properties.fee.clone();
		let days = properties.days;

		let quote_path = format!(
			"/v2/wallet/{}?refresh=true&amount={}&currency={}",
			payment_id, fee.amount, fee.currency
		);
		let quote: WalletQuote =
			serde_json::from_value(self.transport.roundtrip(Request::get(quote_path)).await?)?;

		let Some(unsigned_tx) = quote.unsigned_tx else {
			// No unsigned transaction offered: the balance cannot cover the
			// contribution. Record funding instructions and wait; this is
			// not a failure.
			let delay = self.jitter_ms(RECONCILE_JITTER_MS)?;
			info!(
				balance = quote.balance,
				amount = fee.amount,
				currency = %fee.currency,
				delay_ms = delay,
				"wallet balance insufficient, recorded funding instructions"
			);
			self.state.payment_info = Some(PaymentInfo {
				address,
				amount: fee.amount,
				currency: fee.currency.clone(),
				balance: quote.balance,
			});
			return Ok(SyncOutcome::step(true, delay));
		};

		let signed_tx = self.signer.sign(&unsigned_tx, &keychain)?;

		let payload = json!({
			"viewingId": current.viewing_id,
			"surveyorId": current.surveyor_info.surveyor_id,
			"signedTx": signed_tx,
		});
		let receipt: SubmitReceipt = serde_json::from_value(
			self.transport
				.roundtrip(Request::put(format!("/v2/wallet/{payment_id}"), payload))
				.await?,
		)?;

		info!(
			viewing_id = %current.viewing_id,
			satoshis = receipt.satoshis,
			fee = receipt.fee,
			"contribution submitted"
		);

		self.state.transactions.push(Transaction {
			viewing_id: current.viewing_id.clone(),
			surveyor_id: current.surveyor_info.surveyor_id.clone(),
			credential: None,
			surveyor_ids: None,
			count: 0,
			votes: 0,
			ballots: BTreeMap::new(),
			contribution: Contribution {
				fiat: Fiat {
					amount: fee.amount,
					currency: fee.currency,
				},
				rates: quote.rates,
				satoshis: receipt.satoshis,
				fee: receipt.fee,
			},
			submission_stamp: Some(now),
			submission_id: receipt.submission_id,
			err: None,
		});
		self.state.current_reconcile = None;
		self.state.payment_info = None;
		self.state.reconcile_stamp = Some(now + self.backoff_ms(days));
		// Publisher rules may have moved during the period; refetch before
		// the next voting round.
		self.state.rules_stamp = None;

		Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
	}
}
