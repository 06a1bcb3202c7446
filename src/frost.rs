//! FROST signing engine over secp256k1, backed by `schnorr_fun`.
//!
//! A contribution is the signer's public binonce followed by its signature share:
//!
//! ```text
//! nonce (66 bytes) ‖ share (32 bytes)
//! ```
//!
//! The contributors' nonces form the nonce set of the signing session, so every contribution in a
//! session must have been produced against the same set.
use std::collections::{BTreeMap, BTreeSet};

use schnorr_fun::{
    frost::{Frost, FrostKey, Nonce},
    Message,
};
use secp256kfun::{
    digest::{generic_array::typenum::U32, Digest},
    marker::{EvenY, NonZero, Public, Zero},
    Scalar,
};

use crate::engine::{AggregationError, PartialContribution, RawSignature, SigningEngine};
use crate::types::{KeyId, ParticipantId};

pub const NONCE_LEN: usize = 66;
pub const SHARE_LEN: usize = 32;
pub const CONTRIBUTION_LEN: usize = NONCE_LEN + SHARE_LEN;

pub fn encode_contribution(nonce: &Nonce, share: &Scalar<Public, Zero>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(CONTRIBUTION_LEN);
    bytes.extend_from_slice(&nonce.to_bytes());
    bytes.extend_from_slice(&share.to_bytes());
    bytes
}

pub fn decode_contribution(
    participant: &ParticipantId,
    bytes: &[u8],
) -> Result<(Nonce, Scalar<Public, Zero>), AggregationError> {
    let malformed = |reason: &str| AggregationError::Malformed {
        participant: participant.clone(),
        reason: reason.to_string(),
    };
    if bytes.len() != CONTRIBUTION_LEN {
        return Err(malformed(&format!(
            "expected {} bytes, got {}",
            CONTRIBUTION_LEN,
            bytes.len()
        )));
    }
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&bytes[..NONCE_LEN]);
    let nonce =
        Nonce::<NonZero>::from_bytes(nonce_bytes).ok_or_else(|| malformed("invalid nonce"))?;

    let mut share_bytes = [0u8; SHARE_LEN];
    share_bytes.copy_from_slice(&bytes[NONCE_LEN..]);
    let share = Scalar::<Public, Zero>::from_bytes(share_bytes)
        .ok_or_else(|| malformed("share is not a scalar"))?;
    Ok((nonce, share))
}

pub struct FrostEngine<H, NG> {
    frost: Frost<H, NG>,
    keys: BTreeMap<KeyId, FrostKey<EvenY>>,
}

impl<H: Digest<OutputSize = U32> + Clone, NG> FrostEngine<H, NG> {
    pub fn new(frost: Frost<H, NG>) -> Self {
        FrostEngine {
            frost,
            keys: BTreeMap::new(),
        }
    }

    pub fn with_keys(
        frost: Frost<H, NG>,
        keys: impl IntoIterator<Item = (KeyId, FrostKey<EvenY>)>,
    ) -> Self {
        FrostEngine {
            frost,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn register_key(&mut self, key_id: KeyId, frost_key: FrostKey<EvenY>) {
        self.keys.insert(key_id, frost_key);
    }

    pub fn frost(&self) -> &Frost<H, NG> {
        &self.frost
    }
}

impl<H: Digest<OutputSize = U32> + Clone, NG> SigningEngine for FrostEngine<H, NG> {
    fn aggregate(
        &self,
        key_id: &KeyId,
        digest: &[u8],
        contributions: &[PartialContribution<'_>],
    ) -> Result<RawSignature, AggregationError> {
        let frost_key = self
            .keys
            .get(key_id)
            .ok_or_else(|| AggregationError::UnknownKey(key_id.clone()))?;

        // start_sign_session panics below the key threshold
        if contributions.len() < frost_key.threshold() {
            return Err(AggregationError::BelowKeyThreshold {
                got: contributions.len(),
                required: frost_key.threshold(),
            });
        }

        let mut seen = BTreeSet::new();
        let mut decoded = Vec::with_capacity(contributions.len());
        for contribution in contributions {
            let index = contribution.share_index as usize;
            if index >= frost_key.n_signers() {
                return Err(AggregationError::Malformed {
                    participant: contribution.participant.clone(),
                    reason: format!("share index {} out of range", index),
                });
            }
            if !seen.insert(index) {
                return Err(AggregationError::Malformed {
                    participant: contribution.participant.clone(),
                    reason: format!("share index {} used twice", index),
                });
            }
            let (nonce, share) = decode_contribution(contribution.participant, contribution.payload)?;
            decoded.push((contribution.participant, index, nonce, share));
        }

        let message = Message::<Public>::raw(digest);
        let nonces = decoded
            .iter()
            .map(|(_, index, nonce, _)| (*index, *nonce))
            .collect();
        let session = self.frost.start_sign_session(frost_key, nonces, message);

        for (participant, index, _, share) in &decoded {
            if !self
                .frost
                .verify_signature_share(frost_key, &session, *index, *share)
            {
                return Err(AggregationError::InvalidShare {
                    participant: (*participant).clone(),
                });
            }
        }

        let shares = decoded.iter().map(|(_, _, _, share)| *share).collect();
        let signature = self
            .frost
            .combine_signature_shares(frost_key, &session, shares);
        if !self
            .frost
            .schnorr
            .verify(&frost_key.public_key(), message, &signature)
        {
            return Err(AggregationError::InvalidSignature);
        }

        Ok(RawSignature {
            r: signature.R.to_xonly_bytes().to_vec(),
            s: signature.s.to_bytes().to_vec(),
        })
    }
}
