//! Wire shapes for ledger service responses the flows consume.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Registrar parameters for persona or viewing credential issuance.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RegistrarParams {
	#[serde(rename = "registrarVK")]
	pub registrar_vk: String,
	#[serde(default)]
	pub payload: RegistrarPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegistrarPayload {
	#[serde(default)]
	pub contribution: Option<ContributionSchedule>,
}

/// The registrar's contribution schedule: supported fee amounts keyed by
/// currency code, plus the period length.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContributionSchedule {
	#[serde(default)]
	pub fee: BTreeMap<String, f64>,
	#[serde(default)]
	pub days: Option<u32>,
	/// Registrar-side default currency.
	#[serde(default)]
	pub currency: Option<String>,
}

/// Response to a persona registration proof.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PersonaReceipt {
	pub verification: Value,
	pub wallet: WalletDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WalletDescriptor {
	pub payment_id: String,
	pub address: String,
}

/// Response to a viewing registration proof: the verification material plus
/// the issued batch of per-vote ballot tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ViewingReceipt {
	pub verification: Value,
	pub surveyor_ids: Vec<String>,
}

/// Wallet quote with refreshed exchange rates. `unsigned_tx` is absent when
/// the balance cannot cover the requested amount.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WalletQuote {
	#[serde(default)]
	pub balance: f64,
	#[serde(default)]
	pub rates: BTreeMap<String, f64>,
	#[serde(default)]
	pub unsigned_tx: Option<Value>,
}

/// Receipt for a submitted signed contribution transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitReceipt {
	#[serde(default)]
	pub satoshis: u64,
	#[serde(default)]
	pub fee: u64,
	#[serde(default)]
	pub submission_id: Option<String>,
}
