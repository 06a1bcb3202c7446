//! FROST Signer
//!
//! Holds one key share and produces contributions for signing sessions, in the encoding the
//! [`FrostEngine`](crate::frost::FrostEngine) aggregates.
use rand::RngCore;
use schnorr_fun::{
    frost::{Frost, FrostKey, Nonce, NonceKeyPair},
    Message,
};
use secp256kfun::{
    digest::{generic_array::typenum::U32, Digest},
    marker::{EvenY, Public},
    Scalar,
};
use thiserror::Error;

use crate::frost::encode_contribution;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("nonce set has {got} nonces, key needs {required}")]
    NonceSetTooSmall { got: usize, required: usize },
    #[error("nonce set does not include signer {0}")]
    NotInNonceSet(usize),
    #[error("nonce set does not carry this signer's current nonce")]
    StaleNonce,
}

pub struct FrostSigner<H, NG> {
    frost: Frost<H, NG>,
    frost_key: FrostKey<EvenY>,
    my_index: usize,
    secret_share: Scalar,
    my_nonce: NonceKeyPair,
}

impl<H: Digest<OutputSize = U32> + Clone, NG> FrostSigner<H, NG> {
    /// Create a new [`FrostSigner`] along with the first public nonce to publish.
    ///
    /// Nonces come from `nonce_rng` and are replaced after every signature, so one nonce never
    /// signs twice.
    pub fn new(
        nonce_rng: &mut impl RngCore,
        frost: Frost<H, NG>,
        frost_key: FrostKey<EvenY>,
        my_index: usize,
        secret_share: Scalar,
    ) -> (Self, Nonce) {
        let my_nonce = frost.gen_nonce(nonce_rng);
        let public = my_nonce.public();
        (
            FrostSigner {
                frost,
                frost_key,
                my_index,
                secret_share,
                my_nonce,
            },
            public,
        )
    }

    pub fn index(&self) -> usize {
        self.my_index
    }

    pub fn public_nonce(&self) -> Nonce {
        self.my_nonce.public()
    }

    /// Sign `digest` under `nonce_set` and return the encoded contribution plus the next nonce.
    pub fn sign(
        &mut self,
        nonce_rng: &mut impl RngCore,
        digest: &[u8],
        nonce_set: &[(usize, Nonce)],
    ) -> Result<(Vec<u8>, Nonce), SignerError> {
        if nonce_set.len() < self.frost_key.threshold() {
            return Err(SignerError::NonceSetTooSmall {
                got: nonce_set.len(),
                required: self.frost_key.threshold(),
            });
        }
        let mine = nonce_set
            .iter()
            .find(|(i, _)| *i == self.my_index)
            .ok_or(SignerError::NotInNonceSet(self.my_index))?;
        if mine.1 != self.my_nonce.public() {
            return Err(SignerError::StaleNonce);
        }

        let message = Message::<Public>::raw(digest);
        let session = self
            .frost
            .start_sign_session(&self.frost_key, nonce_set.to_vec(), message);
        let share = self.frost.sign(
            &self.frost_key,
            &session,
            self.my_index,
            &self.secret_share,
            self.my_nonce.clone(),
        );
        let contribution = encode_contribution(&self.my_nonce.public(), &share);

        // Must be replaced **after sign**
        self.my_nonce = self.frost.gen_nonce(nonce_rng);
        Ok((contribution, self.my_nonce.public()))
    }
}
