//! Threshold-signature session coordination
//!
//! ## Description
//!
//! This crate coordinates threshold signing ceremonies for a validator network that needs
//! externally verifiable signatures, e.g. to authorize a batch of outgoing cross-chain transfers.
//! A committee of validators holding shares of a key each submit a contribution; once the
//! contributors' weight reaches the key's threshold the contributions are aggregated into a
//! signature that any node can later look up. The private key is never reconstructed.
//!
//! ## Lifecycle
//!
//! A request passes the [`gateway`], which checks the sender address and chain, resolves the key
//! and the digest to sign, and asks the [`selector`] for the committee. The [`coordinator`] opens a
//! session in `Pending` and records contributions until either
//!
//! - the threshold is crossed and aggregation succeeds (`Completed`, signature in the
//!   [`registry`]),
//! - the threshold is crossed and aggregation fails (`Failed`, reason recorded), or
//! - the session's expiry height passes without enough contributions (`Expired`).
//!
//! Terminal sessions never change again and are kept for auditing. Resubmitting a request for a
//! (key, chain) pair that already has a pending session is rejected.
//!
//! ## Usage Notes
//!
//! All transitions are deterministic functions of the stored state and their inputs, so every
//! node applying the same transitions in the same order ends up with byte-identical state.
//! Each transition commits as a single write batch; the node keeps its state in
//! [`rocks::RocksStore`] across restarts.
//!
//! Aggregation goes through the [`engine::SigningEngine`] trait. [`frost::FrostEngine`] implements
//! it with *[secp256kfun FROST]* and [`signer::FrostSigner`] produces matching contributions.
//!
//! [secp256kfun FROST]: <https://docs.rs/schnorr_fun/latest/schnorr_fun/frost/index.html>

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod frost;
pub mod gateway;
pub mod genesis;
pub mod registry;
pub mod rocks;
pub mod selector;
pub mod server;
pub mod session;
pub mod signer;
pub mod store;
pub mod types;

pub use coordinator::{ContributionOutcome, Coordinator};
pub use error::{ErrorKind, Result, TssError};
pub use session::{SessionStatus, Signature, SigningRequest, SigningSession};
pub use types::{Address, KeyId, ParticipantId, SessionId};
