//! Signing Session Coordinator
//!
//! Drives sessions from `Pending` to `Completed`, `Failed` or `Expired`. Transitions are applied
//! one at a time, in the order the surrounding ledger delivers them.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{PartialContribution, SigningEngine};
use crate::error::{Result, TssError};
use crate::registry::SignatureRegistry;
use crate::selector::ParticipantAssignment;
use crate::session::{Contribution, SessionStatus, Signature, SigningRequest, SigningSession};
use crate::store::{KvStore, SessionStore, Transaction};
use crate::types::{Address, KeyId, ParticipantId, SessionId};

/// Result of an accepted contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContributionOutcome {
    /// Recorded, threshold not reached yet.
    Recorded { collected: u64, threshold: u64 },
    /// This contribution crossed the threshold and aggregation succeeded.
    Completed { signature: Signature },
    /// This contribution crossed the threshold and aggregation failed.
    Failed { reason: String },
}

pub struct Coordinator<S, E> {
    kv: S,
    engine: E,
    timeout_blocks: u64,
}

impl<S: KvStore, E: SigningEngine> Coordinator<S, E> {
    /// Sessions and signatures share `kv` so that a transition commits as one batch.
    pub fn new(kv: S, engine: E, timeout_blocks: u64) -> Self {
        Coordinator {
            kv,
            engine,
            timeout_blocks,
        }
    }

    pub fn timeout_blocks(&self) -> u64 {
        self.timeout_blocks
    }

    fn sessions(&self) -> SessionStore<&S> {
        SessionStore::new(&self.kv)
    }

    /// Opens a `Pending` session for `request` with the committee in `assignment`.
    pub fn open(
        &mut self,
        request: SigningRequest,
        assignment: ParticipantAssignment,
        height: u64,
    ) -> Result<SigningSession> {
        if assignment.key_id != request.key_id {
            return Err(TssError::Internal(format!(
                "assignment for key {} used with request for key {}",
                assignment.key_id, request.key_id
            )));
        }
        if !assignment.is_canonical() {
            return Err(TssError::Internal(format!(
                "assignment for key {} is not strictly ordered by participant",
                assignment.key_id
            )));
        }
        let available = assignment.total_weight();
        if available < assignment.threshold {
            return Err(TssError::InsufficientParticipants {
                available,
                required: assignment.threshold,
            });
        }
        // an expiry of u64::MAX could never be passed by a later tick
        let expires_height = match height.checked_add(self.timeout_blocks) {
            Some(expires) if expires < u64::MAX => expires,
            _ => {
                return Err(TssError::Internal(format!(
                    "expiry for a session opened at height {} is out of range",
                    height
                )))
            }
        };
        if let Some(existing) = self.sessions().pending_for(&request.key_id, &request.scope)? {
            warn!(
                key = %request.key_id,
                scope = %request.scope,
                session = %existing,
                "duplicate signing request"
            );
            return Err(TssError::DuplicateRequest {
                key: request.key_id,
                scope: request.scope,
                session: existing,
            });
        }

        let mut tx = Transaction::new(&self.kv);
        let id = SessionStore::new(&mut tx).next_id()?;
        let session = SigningSession {
            id,
            key_id: request.key_id,
            scope: request.scope,
            sender: request.sender,
            digest: request.digest,
            threshold: assignment.threshold,
            assignment,
            contributions: BTreeMap::new(),
            collected_weight: 0,
            status: SessionStatus::Pending,
            failure: None,
            created_height: height,
            expires_height,
        };
        SessionStore::new(&mut tx).insert(&session)?;
        let batch = tx.into_batch();
        self.kv.write(batch)?;
        info!(
            session = %id,
            key = %session.key_id,
            scope = %session.scope,
            participants = session.assignment.participants.len(),
            threshold = session.threshold,
            expires = session.expires_height,
            "opened signing session"
        );
        Ok(session)
    }

    /// Records `participant`'s contribution and aggregates once the threshold is crossed.
    pub fn contribute(
        &mut self,
        id: SessionId,
        participant: &ParticipantId,
        contribution: Vec<u8>,
    ) -> Result<ContributionOutcome> {
        let mut session = self
            .sessions()
            .get(id)?
            .ok_or(TssError::UnknownSession(id))?;

        if session.status.is_terminal() {
            warn!(session = %id, %participant, status = %session.status, "contribution to closed session");
            return Err(TssError::NotPending {
                session: id,
                status: session.status,
            });
        }
        let weight = session
            .assignment
            .weight_of(participant)
            .ok_or_else(|| {
                debug!(session = %id, %participant, "contribution from unassigned participant");
                TssError::UnknownParticipant {
                    session: id,
                    participant: participant.clone(),
                }
            })?;
        if session.has_contributed(participant) {
            warn!(session = %id, %participant, "duplicate contribution");
            return Err(TssError::DuplicateContribution {
                session: id,
                participant: participant.clone(),
            });
        }
        if contribution.is_empty() {
            return Err(TssError::MissingField("contribution"));
        }

        session
            .contributions
            .insert(participant.clone(), Contribution(contribution));
        session.collected_weight = session.collected_weight.saturating_add(weight);
        debug!(
            session = %id,
            %participant,
            collected = session.collected_weight,
            threshold = session.threshold,
            "recorded contribution"
        );

        let mut tx = Transaction::new(&self.kv);
        if session.collected_weight < session.threshold {
            SessionStore::new(&mut tx).update(&session)?;
            let batch = tx.into_batch();
            self.kv.write(batch)?;
            return Ok(ContributionOutcome::Recorded {
                collected: session.collected_weight,
                threshold: session.threshold,
            });
        }

        let partials: Vec<_> = session
            .assignment
            .participants
            .iter()
            .filter_map(|p| {
                session
                    .contributions
                    .get(&p.participant)
                    .map(|c| PartialContribution {
                        participant: &p.participant,
                        share_index: p.share_index,
                        weight: p.weight,
                        payload: c.as_bytes(),
                    })
            })
            .collect();
        let aggregated = self
            .engine
            .aggregate(&session.key_id, &session.digest, &partials);

        let outcome = match aggregated {
            Ok(raw) => {
                let signature = Signature {
                    session_id: id,
                    r: raw.r,
                    s: raw.s,
                };
                SignatureRegistry::new(&mut tx).store(&signature)?;
                session.status = SessionStatus::Completed;
                ContributionOutcome::Completed { signature }
            }
            Err(e) => {
                let reason = e.to_string();
                session.status = SessionStatus::Failed;
                session.failure = Some(reason.clone());
                ContributionOutcome::Failed { reason }
            }
        };
        SessionStore::new(&mut tx).update(&session)?;
        let batch = tx.into_batch();
        self.kv.write(batch)?;
        match &outcome {
            ContributionOutcome::Failed { reason } => {
                info!(session = %id, %reason, "signing session failed")
            }
            _ => info!(session = %id, "signing session completed"),
        }
        Ok(outcome)
    }

    /// Expires every pending session whose expiry height is below `height` and records
    /// `height` as the last applied block.
    pub fn expire(&mut self, height: u64) -> Result<Vec<SessionId>> {
        let mut tx = Transaction::new(&self.kv);
        let ids = SessionStore::new(&tx).expiring_before(height)?;
        let mut expired = Vec::with_capacity(ids.len());
        for id in &ids {
            let mut session = SessionStore::new(&tx).get(*id)?.ok_or_else(|| {
                TssError::Storage(format!("expiry index points at missing session {}", id))
            })?;
            session.status = SessionStatus::Expired;
            SessionStore::new(&mut tx).update(&session)?;
            expired.push(session);
        }
        if height > SessionStore::new(&tx).height()? {
            SessionStore::new(&mut tx).set_height(height);
        }
        let batch = tx.into_batch();
        if !batch.is_empty() {
            self.kv.write(batch)?;
        }
        for session in &expired {
            info!(
                session = %session.id,
                collected = session.collected_weight,
                threshold = session.threshold,
                "signing session expired"
            );
        }
        Ok(ids)
    }

    /// Last block height applied through [`Coordinator::expire`].
    pub fn height(&self) -> Result<u64> {
        self.sessions().height()
    }

    pub fn session(&self, id: SessionId) -> Result<Option<SigningSession>> {
        self.sessions().get(id)
    }

    pub fn signature(&self, id: SessionId) -> Result<Option<Signature>> {
        SignatureRegistry::new(&self.kv).get(id)
    }

    pub fn pending_sessions(&self) -> Result<Vec<SigningSession>> {
        self.sessions().pending()
    }

    pub fn pending_for(&self, key_id: &KeyId, scope: &str) -> Result<Option<SessionId>> {
        self.sessions().pending_for(key_id, scope)
    }

    pub fn pending_count_for_sender(&self, sender: &Address) -> Result<usize> {
        Ok(self
            .sessions()
            .pending()?
            .iter()
            .filter(|s| &s.sender == sender)
            .count())
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }
}
