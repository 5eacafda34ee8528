//!
//! Publisher rules cache: the classification ruleset and the verified
//! publisher list, both pulled through cursor-based pagination.
//!
//! Each page request carries the continuation stamp; a full page schedules a
//! follow-up fetch after a short pause, a partial page terminates the phase,
//! and an empty page falls straight through to the next phase. Continuation
//! stamps persist across refresh rounds, so later rounds only pull entries
//! newer than what the cache already holds. The cache is owned by the client
//! instance — downstream classification consumers receive it by explicit
//! parameter, never through shared ambient state.

use super::{Client, ClientError, PAGE_DELAY_MS, SHORT_DELAY_MS, SyncOutcome};
use crate::state::{PagedCache, PublisherEntry, Rule};
use crate::transport::Request;
use crate::utils::increment_timestamp;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Server page size for both paginated feeds.
pub(crate) const PAGE_SIZE: usize = 512;
/// How long a completed rules refresh stays fresh.
const RULES_FRESH_MS: u64 = 6 * 60 * 60 * 1000;

/// How one absorbed page leaves its phase.
enum PageOutcome {
	/// Full page: more entries remain, fetch again after a pause.
	Continue,
	/// Partial page: the phase is complete.
	Terminated,
	/// Empty page: the phase is complete and the next one may start now.
	TerminatedEmpty,
}

impl Client {
	pub(crate) fn rules_stale(&self, now: u64) -> bool {
		self.state.ruleset.entries.is_empty()
			|| self.state.rules_stamp.map_or(true, |stamp| stamp <= now)
	}

	/// One pagination step of the rules refresh (sync priority 1).
	pub(crate) async fn fetch_rules(&mut self, now: u64) -> Result<SyncOutcome, ClientError> {
		if self.state.ruleset.done && self.state.publishers.done {
			// A fresh round begins; continuation stamps carry over so the
			// round is incremental.
			self.state.ruleset.done = false;
			self.state.publishers.done = false;
		}

		if !self.state.ruleset.done {
			let stamp = self.state.ruleset.stamp.clone();
			let page: Vec<Rule> = self.fetch_page("/v2/publisher/ruleset", stamp).await?;
			debug!(len = page.len(), "ruleset page fetched");
			match absorb_page(
				&mut self.state.ruleset,
				page,
				|rule| rule.timestamp.clone(),
				|rule| rule.condition.clone(),
			) {
				PageOutcome::Continue => return Ok(SyncOutcome::step(true, PAGE_DELAY_MS)),
				PageOutcome::Terminated => return Ok(SyncOutcome::step(true, SHORT_DELAY_MS)),
				PageOutcome::TerminatedEmpty => {}
			}
		}

		if !self.state.publishers.done {
			let stamp = self.state.publishers.stamp.clone();
			let page: Vec<PublisherEntry> = self.fetch_page("/v2/publisher/verified", stamp).await?;
			debug!(len = page.len(), "verified publishers page fetched");
			match absorb_page(
				&mut self.state.publishers,
				page,
				|entry| entry.timestamp.clone(),
				|entry| entry.publisher.clone(),
			) {
				PageOutcome::Continue => return Ok(SyncOutcome::step(true, PAGE_DELAY_MS)),
				PageOutcome::Terminated | PageOutcome::TerminatedEmpty => {}
			}
		}

		self.state.rules_stamp = Some(now + RULES_FRESH_MS);
		info!(
			rules = self.state.ruleset.entries.len(),
			publishers = self.state.publishers.entries.len(),
			"publisher rules refreshed"
		);
		Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
	}

	async fn fetch_page<T: DeserializeOwned>(
		&self,
		resource: &str,
		stamp: Option<String>,
	) -> Result<Vec<T>, ClientError> {
		let path = match stamp {
			Some(stamp) => format!("{resource}?timestamp={stamp}"),
			None => resource.to_string(),
		};
		let body = self.transport.roundtrip(Request::get(path)).await?;
		Ok(serde_json::from_value(body)?)
	}
}

/// Merge one page into its cache and advance the continuation stamp to one
/// past the last item's timestamp.
fn absorb_page<T>(
	cache: &mut PagedCache<T>,
	page: Vec<T>,
	timestamp: impl Fn(&T) -> String,
	key: impl Fn(&T) -> String,
) -> PageOutcome {
	let full = page.len() == PAGE_SIZE;
	let empty = page.is_empty();

	if let Some(last) = page.last() {
		cache.stamp = Some(increment_timestamp(&timestamp(last)));
	}
	for item in page {
		let item_key = key(&item);
		match cache.entries.iter_mut().find(|existing| key(existing) == item_key) {
			Some(existing) => *existing = item,
			None => cache.entries.push(item),
		}
	}

	if full {
		return PageOutcome::Continue;
	}
	cache.done = true;
	if empty {
		PageOutcome::TerminatedEmpty
	} else {
		PageOutcome::Terminated
	}
}

#[cfg(test)]
mod tests {
	use super::super::testing::*;
	use super::*;
	use crate::state::PersistedState;
	use reqwest::Method;
	use serde_json::json;

	fn rule_page(range: std::ops::Range<usize>) -> serde_json::Value {
		json!(
			range
				.map(|i| json!({ "condition": format!("site-{i}.org"), "timestamp": format!("{}", 1000 + i) }))
				.collect::<Vec<_>>()
		)
	}

	#[tokio::test]
	async fn test_partial_page_terminates_phase_with_incremented_stamp() {
		let transport = MockTransport::default();
		transport.expect(
			Method::GET,
			"/v2/publisher/ruleset",
			Ok(json!([{ "condition": "site.org", "timestamp": "1234" }])),
		);

		let mut client = test_client(
			PersistedState::new(Some("persona-1".into())),
			transport,
		);
		let outcome = client.sync().await.unwrap();
		assert_eq!(outcome, SyncOutcome::step(true, SHORT_DELAY_MS));

		let ruleset = &client.state().ruleset;
		assert_eq!(ruleset.stamp.as_deref(), Some("1235"));
		assert!(ruleset.done);
		assert_eq!(ruleset.entries.len(), 1);
		// The publishers phase runs on the next step.
		assert!(!client.state().publishers.done);
	}

	#[tokio::test]
	async fn test_full_page_schedules_follow_up_fetch() {
		let transport = MockTransport::default();
		transport.expect(Method::GET, "/v2/publisher/ruleset", Ok(rule_page(0..PAGE_SIZE)));

		let mut client = test_client(
			PersistedState::new(Some("persona-1".into())),
			transport,
		);
		let outcome = client.sync().await.unwrap();
		assert_eq!(outcome, SyncOutcome::step(true, PAGE_DELAY_MS));

		let ruleset = &client.state().ruleset;
		assert!(!ruleset.done);
		assert_eq!(ruleset.entries.len(), PAGE_SIZE);
		// Continuation stamp is one past the last item's timestamp.
		assert_eq!(ruleset.stamp.as_deref(), Some(format!("{}", 1000 + PAGE_SIZE).as_str()));
	}

	#[tokio::test]
	async fn test_empty_page_proceeds_to_next_phase_in_same_step() {
		let transport = MockTransport::default();
		transport.expect(Method::GET, "/v2/publisher/ruleset", Ok(json!([])));
		transport.expect(
			Method::GET,
			"/v2/publisher/verified",
			Ok(json!([{ "publisher": "site.org", "verified": true, "timestamp": "50" }])),
		);

		let mut client = test_client(
			PersistedState::new(Some("persona-1".into())),
			transport,
		);
		let outcome = client.sync().await.unwrap();
		assert_eq!(outcome, SyncOutcome::step(true, SHORT_DELAY_MS));

		let state = client.state();
		assert!(state.ruleset.done);
		assert!(state.publishers.done);
		assert_eq!(state.publishers.stamp.as_deref(), Some("51"));
		// Both phases complete: the cache is fresh.
		assert!(state.rules_stamp.is_some());
	}

	#[tokio::test]
	async fn test_continuation_stamp_is_sent_on_follow_up() {
		let mut state = PersistedState::new(Some("persona-1".into()));
		state.ruleset.stamp = Some("2000".into());

		let transport = MockTransport::default();
		transport.expect(
			Method::GET,
			"/v2/publisher/ruleset?timestamp=2000",
			Ok(json!([])),
		);
		transport.expect(Method::GET, "/v2/publisher/verified", Ok(json!([])));

		let mut client = test_client(state, transport);
		client.sync().await.unwrap();
		// An empty incremental round leaves the stamp untouched.
		assert_eq!(client.state().ruleset.stamp.as_deref(), Some("2000"));
	}

	#[tokio::test]
	async fn test_refreshed_entries_replace_older_ones() {
		let mut state = PersistedState::new(Some("persona-1".into()));
		state.ruleset.entries.push(Rule {
			condition: "site.org".into(),
			consequent: None,
			timestamp: "10".into(),
		});

		let transport = MockTransport::default();
		transport.expect(
			Method::GET,
			"/v2/publisher/ruleset",
			Ok(json!([{ "condition": "site.org", "consequent": "site.org/canonical", "timestamp": "20" }])),
		);

		let mut client = test_client(state, transport);
		client.sync().await.unwrap();

		let entries = client.ruleset();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].consequent.as_deref(), Some("site.org/canonical"));
	}
}
