//! Signing requests, sessions and the signatures they resolve to.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TssError};
use crate::selector::ParticipantAssignment;
use crate::types::{serde_hex, Address, KeyId, ParticipantId, SessionId};

/// What must be signed. Built by the gateway and consumed once to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub sender: Address,
    pub key_id: KeyId,
    /// Chain or module scope the digest belongs to.
    pub scope: String,
    #[serde(with = "serde_hex")]
    pub digest: Vec<u8>,
}

impl SigningRequest {
    pub fn new(
        sender: Address,
        key_id: KeyId,
        scope: impl Into<String>,
        digest: Vec<u8>,
    ) -> Result<Self> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(TssError::MissingField("chain"));
        }
        if digest.is_empty() {
            return Err(TssError::MissingField("digest"));
        }
        Ok(SigningRequest {
            sender,
            key_id,
            scope,
            digest,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A participant's opaque partial input toward the final signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contribution(#[serde(with = "serde_hex")] pub Vec<u8>);

impl Contribution {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One signing ceremony. Only the coordinator mutates it and only through
/// [`SessionStore::update`](crate::store::SessionStore::update).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSession {
    pub(crate) id: SessionId,
    pub(crate) key_id: KeyId,
    pub(crate) scope: String,
    pub(crate) sender: Address,
    #[serde(with = "serde_hex")]
    pub(crate) digest: Vec<u8>,
    pub(crate) assignment: ParticipantAssignment,
    pub(crate) threshold: u64,
    pub(crate) contributions: BTreeMap<ParticipantId, Contribution>,
    pub(crate) collected_weight: u64,
    pub(crate) status: SessionStatus,
    pub(crate) failure: Option<String>,
    pub(crate) created_height: u64,
    pub(crate) expires_height: u64,
}

impl SigningSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Committee pinned at creation.
    pub fn assignment(&self) -> &ParticipantAssignment {
        &self.assignment
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn contributions(&self) -> &BTreeMap<ParticipantId, Contribution> {
        &self.contributions
    }

    pub fn collected_weight(&self) -> u64 {
        self.collected_weight
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn created_height(&self) -> u64 {
        self.created_height
    }

    pub fn expires_height(&self) -> u64 {
        self.expires_height
    }

    pub fn has_contributed(&self, participant: &ParticipantId) -> bool {
        self.contributions.contains_key(participant)
    }
}

/// The final artifact of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub session_id: SessionId,
    #[serde(with = "serde_hex")]
    pub r: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub s: Vec<u8>,
}
