//! The signing-engine capability the coordinator aggregates through.
use thiserror::Error;

use crate::types::{KeyId, ParticipantId};

/// A collected contribution handed to the engine, in participant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialContribution<'a> {
    pub participant: &'a ParticipantId,
    pub share_index: u32,
    pub weight: u64,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("engine has no key {0}")]
    UnknownKey(KeyId),
    #[error("{got} contributions, key needs {required}")]
    BelowKeyThreshold { got: usize, required: usize },
    #[error("malformed contribution from {participant}: {reason}")]
    Malformed {
        participant: ParticipantId,
        reason: String,
    },
    #[error("invalid signature share from {participant}")]
    InvalidShare { participant: ParticipantId },
    #[error("aggregate signature does not verify")]
    InvalidSignature,
}

/// Combines contributions into a complete signature over `digest`.
///
/// Implementations must be pure: the same inputs always give the same result, since every node
/// replays aggregation independently.
pub trait SigningEngine {
    fn aggregate(
        &self,
        key_id: &KeyId,
        digest: &[u8],
        contributions: &[PartialContribution<'_>],
    ) -> Result<RawSignature, AggregationError>;
}

impl<E: SigningEngine + ?Sized> SigningEngine for Box<E> {
    fn aggregate(
        &self,
        key_id: &KeyId,
        digest: &[u8],
        contributions: &[PartialContribution<'_>],
    ) -> Result<RawSignature, AggregationError> {
        (**self).aggregate(key_id, digest, contributions)
    }
}
