//!
//! Off-task execution of credential primitives.
//!
//! Requests are tagged with a monotonically increasing message number and
//! replies are matched to their waiting slot strictly by that number. A reply
//! arriving for an abandoned request is dropped, so each call completes at
//! most once. The worker boundary is message passing only; no state is
//! shared with the flows.

use super::{CredentialEngine, CredentialError, CredentialSeed, RequestedCredential};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

enum WorkerOp {
	Request {
		seed: CredentialSeed,
	},
	Finalize {
		credential: String,
		verification: Value,
	},
	Submit {
		credential: String,
		surveyor: Value,
		data: Value,
	},
}

enum WorkerReply {
	Requested(RequestedCredential),
	Finalized(String),
	Submitted(String),
}

struct WorkerMessage {
	msgno: u64,
	op: WorkerOp,
}

type ReplyResult = Result<WorkerReply, CredentialError>;
type ReplySlot = oneshot::Sender<ReplyResult>;

/// Runs a wrapped [`CredentialEngine`] on a spawned task.
///
/// Must be created inside a tokio runtime. The wrapper implements the engine
/// trait itself, so flows stay unaware of whether primitives run inline or
/// off-task.
pub struct WorkerCredentialEngine {
	requests: mpsc::UnboundedSender<WorkerMessage>,
	pending: Arc<Mutex<HashMap<u64, ReplySlot>>>,
	next_msgno: AtomicU64,
}

impl WorkerCredentialEngine {
	/// Spawn the worker task owning `engine` plus the reply dispatcher.
	pub fn spawn(engine: Box<dyn CredentialEngine>) -> Self {
		let (request_tx, mut request_rx) = mpsc::unbounded_channel::<WorkerMessage>();
		let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(u64, ReplyResult)>();
		let pending: Arc<Mutex<HashMap<u64, ReplySlot>>> = Arc::new(Mutex::new(HashMap::new()));

		tokio::spawn(async move {
			while let Some(WorkerMessage { msgno, op }) = request_rx.recv().await {
				let result = match op {
					WorkerOp::Request { seed } => {
						engine.request(&seed).await.map(WorkerReply::Requested)
					}
					WorkerOp::Finalize {
						credential,
						verification,
					} => engine
						.finalize(&credential, &verification)
						.await
						.map(WorkerReply::Finalized),
					WorkerOp::Submit {
						credential,
						surveyor,
						data,
					} => engine
						.submit(&credential, &surveyor, &data)
						.await
						.map(WorkerReply::Submitted),
				};
				if reply_tx.send((msgno, result)).is_err() {
					break;
				}
			}
		});

		let dispatcher_pending = pending.clone();
		tokio::spawn(async move {
			while let Some((msgno, result)) = reply_rx.recv().await {
				let slot = dispatcher_pending.lock().unwrap().remove(&msgno);
				match slot {
					Some(slot) => {
						let _ = slot.send(result);
					}
					None => warn!(msgno, "dropping reply for abandoned credential request"),
				}
			}
		});

		Self {
			requests: request_tx,
			pending,
			next_msgno: AtomicU64::new(1),
		}
	}

	async fn call(&self, op: WorkerOp) -> ReplyResult {
		let msgno = self.next_msgno.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().unwrap().insert(msgno, tx);

		if self.requests.send(WorkerMessage { msgno, op }).is_err() {
			self.pending.lock().unwrap().remove(&msgno);
			return Err(CredentialError::WorkerGone);
		}

		match rx.await {
			Ok(result) => result,
			Err(_) => Err(CredentialError::WorkerGone),
		}
	}
}

#[async_trait]
impl CredentialEngine for WorkerCredentialEngine {
	async fn request(&self, seed: &CredentialSeed) -> Result<RequestedCredential, CredentialError> {
		match self.call(WorkerOp::Request { seed: seed.clone() }).await? {
			WorkerReply::Requested(requested) => Ok(requested),
			_ => Err(CredentialError::Primitive("mismatched worker reply".into())),
		}
	}

	async fn finalize(
		&self,
		credential: &str,
		verification: &Value,
	) -> Result<String, CredentialError> {
		let op = WorkerOp::Finalize {
			credential: credential.to_string(),
			verification: verification.clone(),
		};
		match self.call(op).await? {
			WorkerReply::Finalized(credential) => Ok(credential),
			_ => Err(CredentialError::Primitive("mismatched worker reply".into())),
		}
	}

	async fn submit(
		&self,
		credential: &str,
		surveyor: &Value,
		data: &Value,
	) -> Result<String, CredentialError> {
		let op = WorkerOp::Submit {
			credential: credential.to_string(),
			surveyor: surveyor.clone(),
			data: data.clone(),
		};
		match self.call(op).await? {
			WorkerReply::Submitted(proof) => Ok(proof),
			_ => Err(CredentialError::Primitive("mismatched worker reply".into())),
		}
	}
}
