//!
//! Persona registration: one-time issuance of the long-lived anonymous
//! identity, wallet provisioning, and fee/currency negotiation.

use super::protocol::{ContributionSchedule, PersonaReceipt, RegistrarParams};
use super::{Client, ClientError, MEDIUM_DELAY_MS, SyncOutcome};
use crate::credential::CredentialSeed;
use crate::state::{Fee, Properties, REFERENCE_CURRENCY, Setting, WalletInfo};
use crate::transport::Request;
use serde_json::{Value, json};
use tracing::info;

impl Client {
	/// Register the persona credential and install contribution properties.
	///
	/// The registrar's parameters drive credential issuance (request →
	/// proof submission → finalize) and carry the fee schedule the currency
	/// is negotiated against. A freshly created keychain's public half goes
	/// up with the proof so the ledger can provision the wallet.
	pub(crate) async fn register_persona(&mut self, now: u64) -> Result<SyncOutcome, ClientError> {
		let params_body = self
			.transport
			.roundtrip(Request::get("/v2/registrar/persona"))
			.await?;
		let configuration = params_body.get("payload").cloned().unwrap_or(Value::Null);
		let params: RegistrarParams = serde_json::from_value(params_body)?;
		let schedule = params.payload.contribution.ok_or_else(|| {
			ClientError::Response("registrar offered no contribution schedule".into())
		})?;

		let fee = negotiate_fee(&schedule, self.options.currency.as_deref())?;
		let days = schedule.days.unwrap_or(30);

		let seed = CredentialSeed {
			id: self.state.persona_id.clone(),
			registrar_vk: params.registrar_vk,
		};
		let requested = self.credentials.request(&seed).await?;

		let keychain = self.signer.create_keychain()?;
		let payload = json!({
			"proof": requested.proof,
			"publicKey": keychain.public_key,
			"currency": fee.currency,
		});
		let receipt_body = self
			.transport
			.roundtrip(Request::post(
				format!("/v2/registrar/persona/{}", self.state.persona_id),
				payload,
			))
			.await?;
		let receipt: PersonaReceipt = serde_json::from_value(receipt_body)?;

		let persona = self
			.credentials
			.finalize(&requested.credential, &receipt.verification)
			.await?;

		info!(
			payment_id = %receipt.wallet.payment_id,
			currency = %fee.currency,
			days,
			"persona registered"
		);

		self.state.persona = Some(persona);
		self.state.properties = Some(Properties {
			setting: Setting::AutoContribute,
			fee,
			days,
			wallet: WalletInfo {
				payment_id: receipt.wallet.payment_id,
				address: receipt.wallet.address,
				keychain,
			},
			configuration,
		});
		self.state.boot_stamp = Some(now);
		self.state.reconcile_stamp = Some(now + self.backoff_ms(days));

		Ok(SyncOutcome::step(true, MEDIUM_DELAY_MS))
	}
}

/// Choose the contribution fee: the requested currency when the registrar
/// supports it, else the reference currency, else fail.
fn negotiate_fee(
	schedule: &ContributionSchedule,
	requested: Option<&str>,
) -> Result<Fee, ClientError> {
	let requested = requested
		.or(schedule.currency.as_deref())
		.unwrap_or(REFERENCE_CURRENCY);

	if let Some(amount) = schedule.fee.get(requested) {
		return Ok(Fee {
			currency: requested.to_string(),
			amount: *amount,
		});
	}
	if let Some(amount) = schedule.fee.get(REFERENCE_CURRENCY) {
		return Ok(Fee {
			currency: REFERENCE_CURRENCY.to_string(),
			amount: *amount,
		});
	}
	Err(ClientError::CurrencyUnsupported {
		requested: requested.to_string(),
		reference: REFERENCE_CURRENCY.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::super::testing::*;
	use super::*;
	use crate::state::PersistedState;
	use reqwest::Method;
	use std::collections::BTreeMap;

	fn schedule(pairs: &[(&str, f64)]) -> ContributionSchedule {
		ContributionSchedule {
			fee: pairs
				.iter()
				.map(|(currency, amount)| (currency.to_string(), *amount))
				.collect::<BTreeMap<_, _>>(),
			days: Some(30),
			currency: None,
		}
	}

	#[test]
	fn test_negotiate_prefers_requested_currency() {
		let fee = negotiate_fee(&schedule(&[("EUR", 4.5), ("USD", 5.0)]), Some("EUR")).unwrap();
		assert_eq!(fee.currency, "EUR");
		assert_eq!(fee.amount, 4.5);
	}

	#[test]
	fn test_negotiate_falls_back_to_reference_currency() {
		let fee = negotiate_fee(&schedule(&[("USD", 5.0)]), Some("XYZ")).unwrap();
		assert_eq!(fee.currency, "USD");
		assert_eq!(fee.amount, 5.0);
	}

	#[test]
	fn test_negotiate_fails_when_reference_unsupported_too() {
		let err = negotiate_fee(&schedule(&[("EUR", 4.5)]), Some("XYZ")).unwrap_err();
		assert!(matches!(err, ClientError::CurrencyUnsupported { .. }));
	}

	#[tokio::test]
	async fn test_register_persona_installs_properties() {
		let transport = MockTransport::default();
		transport.expect(
			Method::GET,
			"/v2/registrar/persona",
			Ok(registrar_params_body(&[("USD", 5.0)])),
		);
		transport.expect(
			Method::POST,
			"/v2/registrar/persona/persona-1",
			Ok(serde_json::json!({
				"verification": { "ok": true },
				"wallet": { "paymentId": "wallet-1", "address": "addr-1" },
			})),
		);

		let state = fresh_rules(PersistedState::new(Some("persona-1".into())));
		let mut client = test_client(state, transport);

		let outcome = client.sync().await.unwrap();
		assert_eq!(outcome, SyncOutcome::step(true, MEDIUM_DELAY_MS));

		let state = client.state();
		assert!(state.persona.is_some());
		let properties = state.properties.as_ref().unwrap();
		assert_eq!(properties.fee.currency, "USD");
		assert_eq!(properties.wallet.payment_id, "wallet-1");
		assert!(state.reconcile_stamp.is_some());
		assert!(state.boot_stamp.is_some());
	}

	#[tokio::test]
	async fn test_register_persona_unsupported_currency_writes_nothing() {
		let transport = MockTransport::default();
		transport.expect(
			Method::GET,
			"/v2/registrar/persona",
			Ok(registrar_params_body(&[("EUR", 4.5)])),
		);

		let state = fresh_rules(PersistedState::new(Some("persona-1".into())));
		let mut client = test_client_with_currency(state, transport, Some("XYZ".into()));

		let err = client.sync().await.unwrap_err();
		assert!(matches!(err, ClientError::CurrencyUnsupported { .. }));
		assert!(client.state().persona.is_none());
		assert!(client.state().properties.is_none());
	}
}
