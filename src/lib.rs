//!
//! Client engine for an anonymous contribution ledger.
//!
//! A holder periodically funds a wallet, proves eligibility through
//! blind-signature credentials, and distributes the funded amount as
//! unlinkable votes across publishers — without the ledger service being
//! able to link the funding identity to the voting identity.
//!
//! The core is [`Client::sync`]: a persisted-state step machine that decides
//! which single protocol action to take next, performs the required
//! collaborator calls, and reports updated state plus a caller-honored
//! delay. Durability, scheduling, key management, and the credential
//! cryptosystem all live with the caller behind the [`Transport`],
//! [`CredentialEngine`], and [`WalletSigner`] seams.

/// The sync engine and protocol flows
pub mod client;
/// Anonymous credential boundary and the off-task worker
pub mod credential;
/// Wallet signing boundary
pub mod signer;
/// The persisted state document
pub mod state;
/// HTTP transport boundary
pub mod transport;
/// Clock, random sampling, backoff, and stamp arithmetic
pub mod utils;

pub use client::{Client, ClientError, ClientOptions, SyncOutcome};
pub use credential::{
	CredentialEngine, CredentialError, CredentialSeed, RequestedCredential, WorkerCredentialEngine,
};
pub use signer::{Keychain, SigningError, WalletSigner};
pub use state::{Ballot, PersistedState, Properties, Setting, Transaction};
pub use transport::{HttpTransport, Request, Transport, TransportError};
