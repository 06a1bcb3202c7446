use thiserror::Error;

use crate::session::SessionStatus;
use crate::types::{KeyId, ParticipantId, SessionId};

pub type Result<T> = std::result::Result<T, TssError>;

/// How an error should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or ineligible input, rejected before any state change.
    Validation,
    /// A caller or invariant bug. Rejected like validation errors but logged as an anomaly.
    Protocol,
    /// Real-world unavailability of participants.
    Liveness,
    /// Storage or runtime failure.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TssError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("unknown or revoked key {0}")]
    UnknownKey(KeyId),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("participant {participant} is not assigned to session {session}")]
    UnknownParticipant {
        session: SessionId,
        participant: ParticipantId,
    },

    #[error("key {key} has invalid threshold {threshold}")]
    InvalidThreshold { key: KeyId, threshold: u64 },

    #[error("rejected by admission policy: {0}")]
    PolicyRejected(String),

    #[error("session {session} is {status}, not pending")]
    NotPending {
        session: SessionId,
        status: SessionStatus,
    },

    #[error("participant {participant} already contributed to session {session}")]
    DuplicateContribution {
        session: SessionId,
        participant: ParticipantId,
    },

    #[error("session {session} for key {key} on {scope} is still pending")]
    DuplicateRequest {
        key: KeyId,
        scope: String,
        session: SessionId,
    },

    #[error("signature for session {0} is already stored")]
    AlreadyStored(SessionId),

    #[error("insufficient participants: {available} weight eligible, {required} required")]
    InsufficientParticipants { available: u64, required: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid genesis: {0}")]
    Genesis(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TssError {
    pub fn kind(&self) -> ErrorKind {
        use TssError::*;
        match self {
            InvalidAddress(_)
            | MissingField(_)
            | UnknownKey(_)
            | UnknownSession(_)
            | UnknownParticipant { .. }
            | InvalidThreshold { .. }
            | PolicyRejected(_)
            | Config(_)
            | Genesis(_) => ErrorKind::Validation,
            NotPending { .. }
            | DuplicateContribution { .. }
            | DuplicateRequest { .. }
            | AlreadyStored(_) => ErrorKind::Protocol,
            InsufficientParticipants { .. } => ErrorKind::Liveness,
            Storage(_) | Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(
            TssError::MissingField("chain").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            TssError::AlreadyStored(SessionId(1)).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            TssError::InsufficientParticipants {
                available: 1,
                required: 2
            }
            .kind(),
            ErrorKind::Liveness
        );
        assert_eq!(
            TssError::Storage("x".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn error_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TssError>();
    }
}
