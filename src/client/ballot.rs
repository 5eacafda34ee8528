//!
//! Anonymous votes: reservation (`vote`), preparation, and commitment of
//! individual ballots against voting surveyors.
//!
//! A ballot is created by an explicit vote request, prepared by fetching the
//! surveyor's voting parameters, and committed with an anonymous proof after
//! a randomized delay that decorrelates preparation time from commit time.
//! Failures on either network step are recorded on the owning transaction so
//! the other ballots keep progressing.

use super::{Client, ClientError, MEDIUM_DELAY_MS, SHORT_DELAY_MS, SyncOutcome};
use crate::state::{Ballot, Transaction};
use crate::transport::Request;
use crate::utils::now_ms;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Window for the randomized prepare-to-commit delay.
const BALLOT_JITTER_MS: u64 = 3 * 60 * 60 * 1000;

/// What the engine should do with the pending ballots this step.
pub(crate) enum BallotSelection {
	/// Fetch voting parameters for the ballot at this index.
	Prepare(usize),
	/// Commit the prepared ballot at this index.
	Commit(usize),
	/// Every actionable ballot is inside its anti-correlation delay; the
	/// nearest one frees up after this many milliseconds.
	Wait(u64),
	/// No pending ballot is actionable.
	Skip,
}

impl Client {
	/// Pick one actionable ballot from a shuffled view of the pending queue,
	/// so vote submission order cannot be correlated with creation order.
	pub(crate) fn select_ballot(&self, now: u64) -> BallotSelection {
		if self.state.ballots.is_empty() {
			return BallotSelection::Skip;
		}

		let mut order: Vec<usize> = (0..self.state.ballots.len()).collect();
		order.shuffle(&mut rand::rng());

		let mut nearest_wait: Option<u64> = None;
		for index in order {
			let ballot = &self.state.ballots[index];
			let usable = self
				.state
				.transactions
				.iter()
				.find(|tx| tx.viewing_id == ballot.viewing_id)
				.map(Transaction::has_token)
				.unwrap_or(false);
			if !usable {
				continue;
			}

			match &ballot.prepare {
				None => return BallotSelection::Prepare(index),
				Some(_) => {
					let wait = ballot.delay_stamp.unwrap_or(0).saturating_sub(now);
					if wait == 0 {
						return BallotSelection::Commit(index);
					}
					nearest_wait = Some(nearest_wait.map_or(wait, |w| w.min(wait)));
				}
			}
		}

		match nearest_wait {
			Some(wait) => BallotSelection::Wait(wait),
			None => BallotSelection::Skip,
		}
	}

	/// Fetch the surveyor's voting parameters for one pending ballot and
	/// schedule its randomized commit delay.
	pub(crate) async fn prepare_ballot(&mut self, index: usize) -> Result<SyncOutcome, ClientError> {
		let (viewing_id, surveyor_id) = {
			let ballot = &self.state.ballots[index];
			(ballot.viewing_id.clone(), ballot.surveyor_id.clone())
		};

		let result = self
			.transport
			.roundtrip(Request::get(format!(
				"/v2/surveyor/voting/{surveyor_id}/{viewing_id}"
			)))
			.await;

		match result {
			Ok(params) => {
				let delay = self.jitter_ms(BALLOT_JITTER_MS)?;
				let ballot = &mut self.state.ballots[index];
				ballot.prepare = Some(params);
				ballot.delay_stamp = Some(now_ms() + delay);
				debug!(surveyor_id = %surveyor_id, delay_ms = delay, "ballot prepared");
				Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
			}
			Err(err) => self.record_ballot_error(&viewing_id, err.into()),
		}
	}

	/// Build and submit the anonymous proof for one prepared ballot.
	pub(crate) async fn commit_ballot(&mut self, index: usize) -> Result<SyncOutcome, ClientError> {
		let now = now_ms();
		let (viewing_id, surveyor_id, publisher, params) = {
			let ballot = &self.state.ballots[index];
			(
				ballot.viewing_id.clone(),
				ballot.surveyor_id.clone(),
				ballot.publisher.clone(),
				ballot.prepare.clone().ok_or(ClientError::Incomplete)?,
			)
		};

		// Voting parameters can lapse while the anti-correlation delay runs;
		// drop them and prepare again.
		if let Some(expiration) = params.get("expirationStamp").and_then(Value::as_u64) {
			if expiration <= now {
				let ballot = &mut self.state.ballots[index];
				ballot.prepare = None;
				ballot.delay_stamp = None;
				debug!(surveyor_id = %surveyor_id, "voting parameters expired, re-preparing");
				return Ok(SyncOutcome::step(true, SHORT_DELAY_MS));
			}
		}

		let credential = self
			.state
			.transactions
			.iter()
			.find(|tx| tx.viewing_id == viewing_id)
			.and_then(|tx| tx.credential.clone())
			.ok_or_else(|| ClientError::NotFound(viewing_id.clone()))?;

		let result: Result<(), ClientError> = async {
			let proof = self
				.credentials
				.submit(&credential, &params, &json!({ "publisher": publisher }))
				.await?;
			self.transport
				.roundtrip(Request::put(
					format!("/v2/surveyor/voting/{surveyor_id}"),
					json!({ "proof": proof }),
				))
				.await?;
			Ok(())
		}
		.await;

		match result {
			Ok(()) => {
				let ballot = self.state.ballots.remove(index);
				if let Some(tx) = self
					.state
					.transactions
					.iter_mut()
					.find(|tx| tx.viewing_id == ballot.viewing_id)
				{
					*tx.ballots.entry(ballot.publisher.clone()).or_insert(0) += 1;
					tx.err = None;
				}
				info!(publisher = %ballot.publisher, offset = ballot.offset, "ballot committed");
				Ok(SyncOutcome::step(true, SHORT_DELAY_MS))
			}
			Err(err) => self.record_ballot_error(&viewing_id, err),
		}
	}

	/// Scope a ballot failure to its transaction so other ballots keep
	/// progressing; the ballot itself stays queued for a later attempt.
	fn record_ballot_error(
		&mut self,
		viewing_id: &str,
		err: ClientError,
	) -> Result<SyncOutcome, ClientError> {
		let message = err.to_string();
		warn!(viewing_id, error = %message, "ballot step failed");
		if let Some(tx) = self
			.state
			.transactions
			.iter_mut()
			.find(|tx| tx.viewing_id == viewing_id)
		{
			tx.err = Some(message);
		}
		Ok(SyncOutcome::step(true, MEDIUM_DELAY_MS))
	}

	/// Remaining (unreserved) vote capacity across transactions matching the
	/// optional viewing filter.
	pub fn ballots(&self, viewing_id: Option<&str>) -> u32 {
		self.state
			.transactions
			.iter()
			.filter(|tx| viewing_id.map_or(true, |id| tx.viewing_id == id))
			.map(Transaction::remaining_votes)
			.sum()
	}

	/// Reserve one vote for `publisher` against the first transaction with
	/// spare capacity, appending the pending ballot intent.
	pub fn vote(&mut self, publisher: &str, viewing_id: Option<&str>) -> Result<(), ClientError> {
		if publisher.is_empty() {
			return Err(ClientError::MissingParameter("publisher"));
		}

		let transaction = self
			.state
			.transactions
			.iter_mut()
			.find(|tx| {
				viewing_id.map_or(true, |id| tx.viewing_id == id) && tx.votes < tx.count
			})
			.ok_or_else(|| ClientError::NotFound(viewing_id.unwrap_or("*").to_string()))?;

		let tokens = transaction.surveyor_ids.as_ref().ok_or(ClientError::Incomplete)?;
		let offset = transaction.votes;
		let surveyor_id = tokens
			.get(offset as usize)
			.ok_or_else(|| ClientError::Response(format!("no ballot token at offset {offset}")))?
			.clone();
		transaction.votes += 1;

		let ballot = Ballot {
			viewing_id: transaction.viewing_id.clone(),
			surveyor_id,
			publisher: publisher.to_string(),
			offset,
			prepare: None,
			delay_stamp: None,
		};
		debug!(publisher, offset, "vote reserved");
		self.state.ballots.push(ballot);
		Ok(())
	}
}
