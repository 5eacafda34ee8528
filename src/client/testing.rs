//! In-memory collaborator fakes and state builders shared by the client
//! tests.

use super::{Client, ClientOptions};
use crate::credential::{CredentialEngine, CredentialError, CredentialSeed, RequestedCredential};
use crate::signer::{Keychain, SigningError, WalletSigner};
use crate::state::{
	Contribution, Fee, Fiat, PersistedState, Properties, Rule, Setting, SurveyorInfo, Transaction,
	WalletInfo,
};
use crate::transport::{Request, Transport, TransportError};
use crate::utils::now_ms;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Scripted transport: tests enqueue expected exchanges in order and any
/// deviation panics the test.
#[derive(Default)]
pub(crate) struct MockTransport {
	script: Mutex<VecDeque<(Method, String, Result<Value, TransportError>)>>,
}

impl MockTransport {
	pub(crate) fn expect(
		&self,
		method: Method,
		path_prefix: &str,
		result: Result<Value, TransportError>,
	) {
		self.script
			.lock()
			.unwrap()
			.push_back((method, path_prefix.to_string(), result));
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn roundtrip(&self, request: Request) -> Result<Value, TransportError> {
		let (method, path_prefix, result) = self
			.script
			.lock()
			.unwrap()
			.pop_front()
			.unwrap_or_else(|| panic!("unexpected request {} {}", request.method, request.path));
		assert_eq!(method, request.method, "method mismatch for {}", request.path);
		assert!(
			request.path.starts_with(&path_prefix),
			"expected path starting with {path_prefix}, got {}",
			request.path
		);
		result
	}
}

/// Deterministic credential engine for flow tests.
pub(crate) struct StubCredentials;

#[async_trait]
impl CredentialEngine for StubCredentials {
	async fn request(&self, seed: &CredentialSeed) -> Result<RequestedCredential, CredentialError> {
		Ok(RequestedCredential {
			credential: format!("cred:{}", seed.id),
			proof: format!("proof:{}", seed.id),
		})
	}

	async fn finalize(
		&self,
		credential: &str,
		_verification: &Value,
	) -> Result<String, CredentialError> {
		Ok(format!("{credential}:final"))
	}

	async fn submit(
		&self,
		_credential: &str,
		_surveyor: &Value,
		data: &Value,
	) -> Result<String, CredentialError> {
		Ok(format!(
			"ballot-proof:{}",
			data["publisher"].as_str().unwrap_or("?")
		))
	}
}

/// Signer that wraps the unsigned transaction instead of signing it.
pub(crate) struct StubSigner;

impl WalletSigner for StubSigner {
	fn create_keychain(&self) -> Result<Keychain, SigningError> {
		Ok(Keychain {
			public_key: "stub-public-key".into(),
			material: "stub-material".into(),
		})
	}

	fn sign(&self, unsigned_tx: &Value, _keychain: &Keychain) -> Result<Value, SigningError> {
		Ok(json!({ "signed": unsigned_tx }))
	}
}

pub(crate) fn test_client(state: PersistedState, transport: MockTransport) -> Client {
	test_client_with_currency(state, transport, None)
}

pub(crate) fn test_client_with_currency(
	state: PersistedState,
	transport: MockTransport,
	currency: Option<String>,
) -> Client {
	Client::new(
		Some(state),
		ClientOptions {
			debug: true,
			currency,
		},
		Box::new(transport),
		Box::new(StubCredentials),
		Box::new(StubSigner),
	)
}

/// Mark the rules cache fresh so sync steps past priority 1.
pub(crate) fn fresh_rules(mut state: PersistedState) -> PersistedState {
	state.ruleset.entries.push(Rule {
		condition: "example.org".into(),
		consequent: None,
		timestamp: "1".into(),
	});
	state.ruleset.done = true;
	state.publishers.done = true;
	state.rules_stamp = Some(now_ms() + 60 * 60 * 1000);
	state
}

/// State for a fully registered client: persona, properties, wallet, fresh
/// rules, and a reconcile stamp well in the future.
pub(crate) fn registered_state() -> PersistedState {
	let mut state = fresh_rules(PersistedState::new(Some("persona-1".into())));
	state.persona = Some("persona-credential".into());
	state.properties = Some(Properties {
		setting: Setting::AutoContribute,
		fee: Fee {
			currency: "USD".into(),
			amount: 5.0,
		},
		days: 30,
		wallet: WalletInfo {
			payment_id: "wallet-1".into(),
			address: "wallet-address".into(),
			keychain: Keychain {
				public_key: "pk".into(),
				material: "m".into(),
			},
		},
		configuration: Value::Null,
	});
	state.boot_stamp = Some(now_ms());
	state.reconcile_stamp = Some(now_ms() + 60 * 60 * 1000);
	state
}

/// A funded transaction with its viewing credential and token batch.
pub(crate) fn credentialed_transaction(viewing_id: &str, count: u32) -> Transaction {
	Transaction {
		viewing_id: viewing_id.into(),
		surveyor_id: "surveyor-old".into(),
		credential: Some("viewing-credential".into()),
		surveyor_ids: Some((0..count.max(1)).map(|i| format!("token-{i}")).collect()),
		count,
		votes: 0,
		ballots: BTreeMap::new(),
		contribution: Contribution {
			fiat: Fiat {
				amount: 5.0,
				currency: "USD".into(),
			},
			rates: BTreeMap::new(),
			satoshis: 813_916,
			fee: 8_858,
		},
		submission_stamp: Some(now_ms()),
		submission_id: None,
		err: None,
	}
}

/// An unprepared pending ballot.
pub(crate) fn pending_ballot(
	viewing_id: &str,
	surveyor_id: &str,
	offset: u32,
) -> crate::state::Ballot {
	crate::state::Ballot {
		viewing_id: viewing_id.into(),
		surveyor_id: surveyor_id.into(),
		publisher: "example.org".into(),
		offset,
		prepare: None,
		delay_stamp: None,
	}
}

pub(crate) fn surveyor_info(surveyor_id: &str) -> SurveyorInfo {
	SurveyorInfo {
		surveyor_id: surveyor_id.into(),
		payload: serde_json::Map::new(),
	}
}

/// Registrar parameter body with the given fee schedule.
pub(crate) fn registrar_params_body(fees: &[(&str, f64)]) -> Value {
	let fee: BTreeMap<String, f64> = fees
		.iter()
		.map(|(currency, amount)| (currency.to_string(), *amount))
		.collect();
	json!({
		"registrarVK": "persona-vk",
		"payload": {
			"contribution": { "fee": fee, "days": 30 },
		},
	})
}
