//! Request Gateway: validates inbound signing requests and opens sessions for them.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Params;
use crate::coordinator::Coordinator;
use crate::engine::SigningEngine;
use crate::error::{ErrorKind, Result, TssError};
use crate::selector::{select, KeyRegistry, ParticipantAssignment, ValidatorSnapshot};
use crate::session::SigningRequest;
use crate::store::KvStore;
use crate::types::{serde_hex, Address, KeyId, SessionId};

/// "Sign the pending outgoing batch for `chain` with `key_id`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestMsg {
    pub sender: Address,
    pub chain: String,
    pub key_id: KeyId,
}

impl SignRequestMsg {
    /// Stateless checks.
    pub fn validate_basic(&self, address_lengths: &[usize]) -> Result<()> {
        self.sender.verify_format(address_lengths)?;
        if self.chain.trim().is_empty() {
            return Err(TssError::MissingField("chain"));
        }
        Ok(())
    }
}

/// Resolves a chain to the digest of its pending outgoing batch.
pub trait DigestSource {
    fn digest_for(&self, chain: &str) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingBatches {
    batches: BTreeMap<String, HexDigest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct HexDigest(#[serde(with = "serde_hex")] Vec<u8>);

impl PendingBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, chain: impl Into<String>, digest: Vec<u8>) {
        self.batches.insert(chain.into(), HexDigest(digest));
    }

    pub fn clear(&mut self, chain: &str) {
        self.batches.remove(chain);
    }
}

impl DigestSource for PendingBatches {
    fn digest_for(&self, chain: &str) -> Option<Vec<u8>> {
        self.batches.get(chain).map(|d| d.0.clone())
    }
}

pub struct AdmissionContext<'a> {
    pub height: u64,
    pub pending_for_sender: usize,
    pub request: &'a SigningRequest,
}

/// Eligibility checks beyond the format rules, applied before any state change.
pub trait AdmissionPolicy: Send + Sync {
    fn admit(&self, ctx: &AdmissionContext<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn admit(&self, _ctx: &AdmissionContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Caps the number of pending sessions a single sender may hold.
#[derive(Debug, Clone, Copy)]
pub struct PendingLimit {
    pub max_per_sender: u32,
}

impl AdmissionPolicy for PendingLimit {
    fn admit(&self, ctx: &AdmissionContext<'_>) -> Result<()> {
        if ctx.pending_for_sender >= self.max_per_sender as usize {
            return Err(TssError::PolicyRejected(format!(
                "sender {} already has {} pending sessions (limit {})",
                ctx.request.sender, ctx.pending_for_sender, self.max_per_sender
            )));
        }
        Ok(())
    }
}

pub fn policy_from_params(params: &Params) -> Box<dyn AdmissionPolicy> {
    match params.max_pending_per_sender {
        Some(max_per_sender) => Box::new(PendingLimit { max_per_sender }),
        None => Box::new(AllowAll),
    }
}

pub struct Gateway<D> {
    address_lengths: Vec<usize>,
    policy: Box<dyn AdmissionPolicy>,
    digests: D,
}

impl<D: DigestSource> Gateway<D> {
    pub fn new(address_lengths: Vec<usize>, policy: Box<dyn AdmissionPolicy>, digests: D) -> Self {
        Gateway {
            address_lengths,
            policy,
            digests,
        }
    }

    pub fn from_params(params: &Params, digests: D) -> Self {
        Self::new(params.address_lengths.clone(), policy_from_params(params), digests)
    }

    pub fn digests(&self) -> &D {
        &self.digests
    }

    pub fn digests_mut(&mut self) -> &mut D {
        &mut self.digests
    }

    /// Validates `msg` and opens one session for it. Nothing is written unless every check passes.
    pub fn submit<S: KvStore, E: SigningEngine>(
        &self,
        coordinator: &mut Coordinator<S, E>,
        keys: &KeyRegistry,
        validators: &ValidatorSnapshot,
        msg: SignRequestMsg,
        height: u64,
    ) -> Result<SessionId> {
        self.check(coordinator, keys, validators, msg, height)
            .and_then(|(request, assignment)| coordinator.open(request, assignment, height))
            .map(|session| session.id())
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::Validation => debug!(error = %e, "rejected signing request"),
                    ErrorKind::Protocol => warn!(error = %e, "signing request violates protocol"),
                    ErrorKind::Liveness | ErrorKind::Internal => {}
                }
                e
            })
    }

    fn check<S: KvStore, E: SigningEngine>(
        &self,
        coordinator: &Coordinator<S, E>,
        keys: &KeyRegistry,
        validators: &ValidatorSnapshot,
        msg: SignRequestMsg,
        height: u64,
    ) -> Result<(SigningRequest, ParticipantAssignment)> {
        msg.validate_basic(&self.address_lengths)?;
        keys.resolve(&msg.key_id)?;
        if let Some(session) = coordinator.pending_for(&msg.key_id, &msg.chain)? {
            return Err(TssError::DuplicateRequest {
                key: msg.key_id,
                scope: msg.chain,
                session,
            });
        }

        let digest = self
            .digests
            .digest_for(&msg.chain)
            .ok_or(TssError::MissingField("digest"))?;
        let request = SigningRequest::new(msg.sender, msg.key_id, msg.chain, digest)?;

        let pending_for_sender = coordinator.pending_count_for_sender(&request.sender)?;
        self.policy.admit(&AdmissionContext {
            height,
            pending_for_sender,
            request: &request,
        })?;

        let assignment = select(keys, &request.key_id, validators)?;
        Ok((request, assignment))
    }
}
