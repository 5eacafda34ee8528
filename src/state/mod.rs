//!
//! Persisted client state.
//!
//! One JSON document is the unit of durability: every flow mutates the
//! in-memory [`PersistedState`] and hands it back to the caller, which reads
//! and writes the document atomically around each sync cycle. The client
//! never persists state itself.
//!
//! The schema is versioned; [`PersistedState::from_value`] runs the single
//! explicit migration that upgrades older document shapes at load time, so
//! no behavior elsewhere branches on which optional fields happen to be
//! present.

use crate::signer::Keychain;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current persisted schema version.
pub const STATE_VERSION: u32 = 2;

/// Fallback fee currency when the requested one is unsupported.
pub const REFERENCE_CURRENCY: &str = "USD";

/// The single durable state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
	pub version: u32,
	/// Long-lived anonymous holder identifier, generated on first use.
	pub persona_id: String,
	/// Serialized persona credential, present once registration finalizes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub persona: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub properties: Option<Properties>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub boot_stamp: Option<u64>,
	/// When the next reconcile becomes due (epoch ms).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reconcile_stamp: Option<u64>,
	/// Generic "not yet" gate: sync is a no-op until this stamp passes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delay_stamp: Option<u64>,
	/// In-flight funding cycle; at most one exists at a time.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub current_reconcile: Option<CurrentReconcile>,
	#[serde(default)]
	pub transactions: Vec<Transaction>,
	/// Pending vote intents, consumed as they commit.
	#[serde(default)]
	pub ballots: Vec<Ballot>,
	/// Publisher classification rules, paginated incrementally.
	#[serde(default)]
	pub ruleset: PagedCache<Rule>,
	/// Verified publisher identifiers, paginated incrementally.
	#[serde(default)]
	pub publishers: PagedCache<PublisherEntry>,
	/// Rules cache freshness deadline (epoch ms).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rules_stamp: Option<u64>,
	/// Funding instructions recorded when the wallet cannot cover the
	/// contribution.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payment_info: Option<PaymentInfo>,
}

impl PersistedState {
	/// Fresh state for a new holder; a persona id is generated when the
	/// caller does not supply one.
	pub fn new(persona_id: Option<String>) -> Self {
		Self {
			version: STATE_VERSION,
			persona_id: persona_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
			persona: None,
			properties: None,
			boot_stamp: None,
			reconcile_stamp: None,
			delay_stamp: None,
			current_reconcile: None,
			transactions: Vec::new(),
			ballots: Vec::new(),
			ruleset: PagedCache::default(),
			publishers: PagedCache::default(),
			rules_stamp: None,
			payment_info: None,
		}
	}

	/// Load a persisted document, upgrading legacy shapes in place.
	pub fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
		migrate(&mut value);
		serde_json::from_value(value)
	}
}

/// Upgrade older persisted shapes to the current schema.
fn migrate(value: &mut Value) {
	let Some(root) = value.as_object_mut() else {
		return;
	};
	let version = root.get("version").and_then(Value::as_u64).unwrap_or(1);
	if version >= u64::from(STATE_VERSION) {
		return;
	}

	// v1 kept `properties.fee` as a bare amount in the reference currency.
	if let Some(fee) = root.get_mut("properties").and_then(|p| p.get_mut("fee")) {
		if let Some(amount) = fee.as_f64() {
			*fee = serde_json::json!({ "currency": REFERENCE_CURRENCY, "amount": amount });
		}
	}

	// v1 kept the merged ruleset as a bare array with no continuation stamp.
	for field in ["ruleset", "publishers"] {
		if let Some(cache) = root.get_mut(field) {
			if cache.is_array() {
				*cache = serde_json::json!({
					"entries": cache.take(),
					"done": false,
				});
			}
		}
	}

	root.insert("version".into(), STATE_VERSION.into());
}

/// Contribution configuration installed by persona registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
	pub setting: Setting,
	pub fee: Fee,
	/// Contribution period length in days.
	pub days: u32,
	pub wallet: WalletInfo,
	/// Raw registrar payload captured at registration time.
	#[serde(default)]
	pub configuration: Value,
}

/// How contributions are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Setting {
	/// Fund and distribute automatically each period.
	AutoContribute,
	/// The caller drives funding explicitly.
	Manual,
}

impl Setting {
	/// Whether reconcile requests must carry a well-formed viewing id.
	pub fn requires_viewing_id(&self) -> bool {
		matches!(self, Setting::AutoContribute)
	}
}

/// Per-period contribution fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
	pub currency: String,
	pub amount: f64,
}

/// The provisioned wallet backing contributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
	pub payment_id: String,
	pub address: String,
	pub keychain: Keychain,
}

/// The single-flight in-progress funding cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentReconcile {
	pub viewing_id: String,
	pub surveyor_info: SurveyorInfo,
	pub timestamp: u64,
}

/// A server-issued funding or voting round descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyorInfo {
	pub surveyor_id: String,
	#[serde(flatten)]
	pub payload: serde_json::Map<String, Value>,
}

/// One funded contribution and its voting lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
	pub viewing_id: String,
	/// Contribution surveyor this transaction was funded against.
	pub surveyor_id: String,
	/// Anonymous voting credential, present only once the viewing registers.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credential: Option<String>,
	/// Per-vote ballot tokens issued with the viewing credential.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub surveyor_ids: Option<Vec<String>>,
	/// Size of the issued token batch. `votes <= count` always holds.
	#[serde(default)]
	pub count: u32,
	/// Votes reserved so far.
	#[serde(default)]
	pub votes: u32,
	/// Committed votes per publisher.
	#[serde(default)]
	pub ballots: BTreeMap<String, u32>,
	pub contribution: Contribution,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub submission_stamp: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub submission_id: Option<String>,
	/// Last ballot failure scoped to this transaction.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub err: Option<String>,
}

impl Transaction {
	/// Unreserved vote capacity.
	pub fn remaining_votes(&self) -> u32 {
		self.count.saturating_sub(self.votes)
	}

	/// Whether ballots can be prepared and committed against this
	/// transaction.
	pub fn has_token(&self) -> bool {
		self.credential.is_some() && self.surveyor_ids.is_some()
	}
}

/// Amount breakdown of one funded contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
	pub fiat: Fiat,
	/// Exchange rates quoted when the contribution was funded.
	#[serde(default)]
	pub rates: BTreeMap<String, f64>,
	pub satoshis: u64,
	pub fee: u64,
}

/// Fiat amount with its currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fiat {
	pub amount: f64,
	pub currency: String,
}

/// One pending anonymous vote intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
	pub viewing_id: String,
	/// Voting token consumed by this ballot.
	pub surveyor_id: String,
	pub publisher: String,
	/// Token index within the batch at reservation time.
	pub offset: u32,
	/// Server voting parameters, present once prepared.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prepare: Option<Value>,
	/// Anti-correlation jitter: the ballot may not commit before this stamp.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delay_stamp: Option<u64>,
}

/// Funding instructions surfaced when the wallet balance is short.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
	pub address: String,
	pub amount: f64,
	pub currency: String,
	pub balance: f64,
}

/// Cursor-paginated cache: accumulated entries plus the continuation stamp
/// for the next incremental fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedCache<T> {
	#[serde(default = "Vec::new")]
	pub entries: Vec<T>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stamp: Option<String>,
	/// Whether the current refresh round finished this phase.
	#[serde(default)]
	pub done: bool,
}

impl<T> Default for PagedCache<T> {
	fn default() -> Self {
		Self {
			entries: Vec::new(),
			stamp: None,
			done: false,
		}
	}
}

/// One publisher classification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
	/// Condition matched against a visited site.
	pub condition: String,
	/// Canonical publisher identity attributed when the condition matches.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub consequent: Option<String>,
	/// Opaque lexically-ordered pagination timestamp.
	pub timestamp: String,
}

/// One verified publisher entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherEntry {
	pub publisher: String,
	#[serde(default)]
	pub verified: bool,
	/// Opaque lexically-ordered pagination timestamp.
	pub timestamp: String,
}
