//!
//! The ledger client: a persisted-state step machine for the anonymous
//! contribution protocol.
//!
//! [`Client::sync`] performs at most one protocol step per call — refresh the
//! publisher rules, register the persona, prepare or commit one ballot,
//! register a viewing, or advance an in-flight reconcile — and reports
//! whether the state document changed plus a suggested delay. The caller
//! owns durability and the outer scheduling loop; nothing here retries or
//! sleeps on its own.
//!
//! Privacy is carried by the state shape itself: funding runs under the
//! persona, voting under per-cycle viewings, ballots commit in shuffled
//! order after a randomized delay, and credential material is stripped as
//! soon as a transaction is fully voted.

mod ballot;
mod protocol;
mod reconcile;
mod registration;
mod rules;
mod viewing;

#[cfg(test)]
pub(crate) mod testing;

use crate::credential::{CredentialEngine, CredentialError};
use crate::signer::{SigningError, WalletSigner};
use crate::state::{Fee, PersistedState, PublisherEntry, Rule, Setting};
use crate::transport::{Request, Transport, TransportError};
use crate::utils::{self, EntropyError, now_ms};
use ballot::BallotSelection;
use protocol::WalletDescriptor;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Prompt re-invocation after a state-changing step.
pub(crate) const SHORT_DELAY_MS: u64 = 100;
/// Breather after heavyweight steps (credential issuance, ballot errors).
pub(crate) const MEDIUM_DELAY_MS: u64 = 30_000;
/// Pause between pages while a paginated feed is mid-refresh.
pub(crate) const PAGE_DELAY_MS: u64 = 5_000;

/// Typed runtime configuration, populated by the caller at the process
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
	/// Collapse every wait-N-days computation to a fixed short interval.
	pub debug: bool,
	/// Preferred fee currency, negotiated against the registrar's schedule.
	pub currency: Option<String>,
}

/// Result of one sync step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
	/// A step was performed or a wait is in effect. `dirty` says whether the
	/// state document changed and must be re-persisted; `delay` is the
	/// suggested pause before the next call.
	Step { dirty: bool, delay: Duration },
	/// Nothing is currently actionable.
	Idle,
}

impl SyncOutcome {
	pub(crate) fn step(dirty: bool, delay_ms: u64) -> Self {
		SyncOutcome::Step {
			dirty,
			delay: Duration::from_millis(delay_ms),
		}
	}
}

/// Error types for client operations.
///
/// Caller bugs (`MissingParameter`, `InvalidParameter`, `Incomplete`) are
/// raised before any I/O and must not be retried; the remaining variants are
/// operational failures surfaced from collaborators without internal retry.
/// "Not yet time" conditions are never errors — they come back as a
/// [`SyncOutcome::Step`] carrying a delay.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("missing parameter: {0}")]
	MissingParameter(&'static str),

	#[error("invalid parameter {name}: {reason}")]
	InvalidParameter {
		name: &'static str,
		reason: String,
	},

	#[error("client initialization incomplete")]
	Incomplete,

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error(transparent)]
	Credential(#[from] CredentialError),

	#[error(transparent)]
	Signing(#[from] SigningError),

	#[error("currency {requested} not supported, nor reference currency {reference}")]
	CurrencyUnsupported {
		requested: String,
		reference: String,
	},

	#[error("no transaction matches viewing id {0}")]
	NotFound(String),

	#[error("malformed response body: {0}")]
	Body(#[from] serde_json::Error),

	#[error("unexpected response: {0}")]
	Response(String),

	#[error(transparent)]
	Entropy(#[from] EntropyError),
}

/// A client instance: the persisted state plus handles to the three
/// collaborators. All flows run on one logical thread — `sync` and
/// `reconcile` take `&mut self` and must not be re-entered until the
/// previous call resolves, which the borrow checker enforces.
pub struct Client {
	state: PersistedState,
	options: ClientOptions,
	transport: Box<dyn Transport>,
	credentials: Box<dyn CredentialEngine>,
	signer: Box<dyn WalletSigner>,
}

impl Client {
	/// Create a client over previously persisted state, or fresh state with
	/// a generated persona id when none exists yet.
	pub fn new(
		state: Option<PersistedState>,
		options: ClientOptions,
		transport: Box<dyn Transport>,
		credentials: Box<dyn CredentialEngine>,
		signer: Box<dyn WalletSigner>,
	) -> Self {
		let state = state.unwrap_or_else(|| PersistedState::new(None));
		Self {
			state,
			options,
			transport,
			credentials,
			signer,
		}
	}

	/// The state document to persist after a dirty step.
	pub fn state(&self) -> &PersistedState {
		&self.state
	}

	/// Perform at most one protocol step.
	///
	/// Conditions are checked in priority order; each one gates the next.
	/// Collaborator failures surface as errors with no internal retry — the
	/// caller's loop decides when to call again.
	pub async fn sync(&mut self) -> Result<SyncOutcome, ClientError> {
		let now = now_ms();

		// Generic "not yet" gate.
		if let Some(stamp) = self.state.delay_stamp {
			if stamp > now {
				debug!(delay_ms = stamp - now, "sync gated by delay stamp");
				return Ok(SyncOutcome::step(false, stamp - now));
			}
			self.state.delay_stamp = None;
		}

		// 1. Publisher rules absent or past their freshness stamp.
		if self.rules_stale(now) {
			return self.fetch_rules(now).await;
		}

		// 2. No persona credential yet.
		if self.state.persona.is_none() {
			return self.register_persona(now).await;
		}

		// 3. Pending ballots, selected from a shuffled view so submission
		// order cannot be correlated with creation order. Ballots still
		// inside their anti-correlation delay are skipped, not waited on.
		let ballot_wait = match self.select_ballot(now) {
			BallotSelection::Prepare(index) => return self.prepare_ballot(index).await,
			BallotSelection::Commit(index) => return self.commit_ballot(index).await,
			BallotSelection::Wait(remaining) => Some(remaining),
			BallotSelection::Skip => None,
		};

		// 4. A funded transaction still awaiting its viewing credential.
		if let Some(viewing_id) = self
			.state
			.transactions
			.iter()
			.find(|tx| tx.credential.is_none())
			.map(|tx| tx.viewing_id.clone())
		{
			return self.register_viewing(&viewing_id).await;
		}

		// 5. An in-flight reconcile.
		if self.state.current_reconcile.is_some() {
			return self.advance_reconcile(now).await;
		}

		// 6. Fully voted transactions: strip sensitive material promptly.
		if self.collect_transactions() {
			return Ok(SyncOutcome::step(true, SHORT_DELAY_MS));
		}

		// Only delayed ballots remain: tell the caller when to come back.
		if let Some(delay) = ballot_wait {
			return Ok(SyncOutcome::step(false, delay));
		}

		debug!("sync idle");
		Ok(SyncOutcome::Idle)
	}

	/// Strip credential material from fully voted transactions with no
	/// outstanding ballots, bounding how long sensitive tokens are retained.
	fn collect_transactions(&mut self) -> bool {
		let ballots = &self.state.ballots;
		let mut stripped = false;
		for tx in &mut self.state.transactions {
			let complete = tx.votes == tx.count
				&& tx.credential.is_some()
				&& !ballots.iter().any(|b| b.viewing_id == tx.viewing_id);
			if complete {
				info!(viewing_id = %tx.viewing_id, "transaction fully voted, stripping credential material");
				tx.credential = None;
				tx.surveyor_ids = None;
				stripped = true;
			}
		}
		stripped
	}

	/// The active publisher classification rules.
	pub fn ruleset(&self) -> &[Rule] {
		&self.state.ruleset.entries
	}

	/// The verified publisher list.
	pub fn verified_publishers(&self) -> &[PublisherEntry] {
		&self.state.publishers.entries
	}

	/// Address of the provisioned wallet.
	pub fn wallet_address(&self) -> Result<&str, ClientError> {
		self.state
			.properties
			.as_ref()
			.map(|p| p.wallet.address.as_str())
			.ok_or(ClientError::Incomplete)
	}

	/// Live wallet snapshot (balance, rates, addresses) from the ledger.
	pub async fn wallet_properties(&self) -> Result<Value, ClientError> {
		let properties = self.state.properties.as_ref().ok_or(ClientError::Incomplete)?;
		let path = format!("/v2/wallet/{}", properties.wallet.payment_id);
		Ok(self.transport.roundtrip(Request::get(path)).await?)
	}

	/// Reinstall the wallet descriptor from the ledger's recovery endpoint.
	pub async fn recover_wallet(&mut self) -> Result<(), ClientError> {
		let payment_id = self
			.state
			.properties
			.as_ref()
			.ok_or(ClientError::Incomplete)?
			.wallet
			.payment_id
			.clone();
		let body = self
			.transport
			.roundtrip(Request::get(format!("/v2/wallet/{payment_id}/recover")))
			.await?;
		let recovered: WalletDescriptor = serde_json::from_value(body)?;

		let properties = self.state.properties.as_mut().ok_or(ClientError::Incomplete)?;
		info!(payment_id = %recovered.payment_id, "wallet recovered");
		properties.wallet.payment_id = recovered.payment_id;
		properties.wallet.address = recovered.address;
		Ok(())
	}

	/// The configured contribution setting and fee.
	pub fn contribution_properties(&self) -> Result<(Setting, Fee), ClientError> {
		let properties = self.state.properties.as_ref().ok_or(ClientError::Incomplete)?;
		Ok((properties.setting, properties.fee.clone()))
	}

	/// Adjust the contribution setting and/or fee in place.
	pub fn set_contribution_properties(
		&mut self,
		setting: Option<Setting>,
		fee: Option<Fee>,
	) -> Result<(), ClientError> {
		let properties = self.state.properties.as_mut().ok_or(ClientError::Incomplete)?;
		if let Some(setting) = setting {
			properties.setting = setting;
		}
		if let Some(fee) = fee {
			properties.fee = fee;
		}
		Ok(())
	}

	/// Time remaining until the next reconcile is due; `None` when due now.
	pub fn time_until_reconcile(&self) -> Result<Option<Duration>, ClientError> {
		let stamp = self.state.reconcile_stamp.ok_or(ClientError::Incomplete)?;
		let now = now_ms();
		Ok((stamp > now).then(|| Duration::from_millis(stamp - now)))
	}

	pub fn is_ready_to_reconcile(&self) -> Result<bool, ClientError> {
		Ok(self.time_until_reconcile()?.is_none())
	}

	pub(crate) fn backoff_ms(&self, days: u32) -> u64 {
		utils::backoff_ms(days, self.options.debug)
	}

	/// A positive jittered delay in `[SHORT_DELAY_MS, max_ms)`, collapsed in
	/// debug mode so cycles stay fast.
	pub(crate) fn jitter_ms(&self, max_ms: u64) -> Result<u64, ClientError> {
		let cap = if self.options.debug { 1_000 } else { max_ms };
		Ok(utils::random_int(SHORT_DELAY_MS, cap.max(SHORT_DELAY_MS + 1))?)
	}
}

#[cfg(test)]
mod tests {
	use super::testing::*;
	use super::*;
	use crate::state::Transaction;

	#[tokio::test]
	async fn test_sync_honors_delay_stamp() {
		let mut client = test_client(registered_state(), MockTransport::default());
		client.state.delay_stamp = Some(now_ms() + 60_000);

		match client.sync().await.unwrap() {
			SyncOutcome::Step { dirty, delay } => {
				assert!(!dirty);
				assert!(delay > Duration::from_millis(0));
			}
			SyncOutcome::Idle => panic!("expected a gated step"),
		}
	}

	#[tokio::test]
	async fn test_sync_is_idle_when_nothing_pending() {
		let mut client = test_client(registered_state(), MockTransport::default());
		assert_eq!(client.sync().await.unwrap(), SyncOutcome::Idle);
	}

	#[tokio::test]
	async fn test_sync_strips_completed_transactions() {
		let mut state = registered_state();
		let mut tx = credentialed_transaction("viewing-1", 2);
		tx.votes = 2;
		state.transactions.push(tx);

		let mut client = test_client(state, MockTransport::default());
		let outcome = client.sync().await.unwrap();
		assert_eq!(outcome, SyncOutcome::step(true, SHORT_DELAY_MS));

		let tx = &client.state().transactions[0];
		assert!(tx.credential.is_none());
		assert!(tx.surveyor_ids.is_none());

		// The next pass has nothing left to do.
		assert_eq!(client.sync().await.unwrap(), SyncOutcome::Idle);
	}

	#[tokio::test]
	async fn test_sync_keeps_credentials_while_ballots_outstanding() {
		let mut state = registered_state();
		let mut tx = credentialed_transaction("viewing-1", 2);
		tx.votes = 2;
		state.transactions.push(tx);
		state.ballots.push(pending_ballot("viewing-1", "token-0", 0));
		// Park the ballot inside its anti-correlation delay so the engine
		// cannot act on it.
		state.ballots[0].prepare = Some(serde_json::json!({}));
		state.ballots[0].delay_stamp = Some(now_ms() + 60_000);

		let mut client = test_client(state, MockTransport::default());
		match client.sync().await.unwrap() {
			SyncOutcome::Step { dirty, delay } => {
				assert!(!dirty);
				assert!(delay > Duration::from_millis(0));
			}
			SyncOutcome::Idle => panic!("expected the ballot wait to be reported"),
		}
		assert!(client.state().transactions[0].credential.is_some());
	}

	#[tokio::test]
	async fn test_accessors_require_registration() {
		let state = PersistedState::new(Some("persona-1".into()));
		let client = test_client(state, MockTransport::default());

		assert!(matches!(
			client.wallet_address(),
			Err(ClientError::Incomplete)
		));
		assert!(matches!(
			client.time_until_reconcile(),
			Err(ClientError::Incomplete)
		));
	}

	#[tokio::test]
	async fn test_wallet_address_after_registration() {
		let client = test_client(registered_state(), MockTransport::default());
		assert_eq!(client.wallet_address().unwrap(), "wallet-address");
	}

	#[tokio::test]
	async fn test_viewing_registration_precedes_reconcile_advance() {
		// A transaction without a credential outranks the in-flight
		// reconcile; the first roundtrip must hit the viewing registrar.
		let mut state = registered_state();
		state.transactions.push(Transaction {
			credential: None,
			..credentialed_transaction("viewing-1", 2)
		});
		state.current_reconcile = Some(crate::state::CurrentReconcile {
			viewing_id: "viewing-2".into(),
			surveyor_info: surveyor_info("surveyor-9"),
			timestamp: now_ms(),
		});

		let transport = MockTransport::default();
		transport.expect(
			reqwest::Method::GET,
			"/v2/registrar/viewing",
			Err(TransportError::Timeout),
		);

		let mut client = test_client(state, transport);
		assert!(matches!(
			client.sync().await,
			Err(ClientError::Transport(TransportError::Timeout))
		));
	}
}
