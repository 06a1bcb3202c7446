//! Signature Registry: completed signatures keyed by session id (`0x05 ‖ id`).
use tracing::warn;

use crate::error::{Result, TssError};
use crate::session::Signature;
use crate::store::{decode, encode, KvRead, KvWrite};
use crate::types::SessionId;

const SIGNATURE_PREFIX: u8 = 0x05;

fn signature_key(id: SessionId) -> Vec<u8> {
    let mut key = vec![SIGNATURE_PREFIX];
    key.extend_from_slice(&id.to_be_bytes());
    key
}

pub struct SignatureRegistry<S> {
    kv: S,
}

impl<S> SignatureRegistry<S> {
    pub fn new(kv: S) -> Self {
        SignatureRegistry { kv }
    }
}

impl<S: KvRead> SignatureRegistry<S> {
    /// `None` when the session is unknown, still pending, failed or expired.
    pub fn get(&self, id: SessionId) -> Result<Option<Signature>> {
        self.kv
            .get(&signature_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

impl<S: KvWrite> SignatureRegistry<S> {
    /// Stores the signature a session resolved to. A session is signed at most once.
    pub fn store(&mut self, signature: &Signature) -> Result<()> {
        let key = signature_key(signature.session_id);
        if self.kv.get(&key)?.is_some() {
            warn!(session = %signature.session_id, "signature stored twice");
            return Err(TssError::AlreadyStored(signature.session_id));
        }
        let value = encode(signature)?;
        self.kv.set(&key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn signature(id: u64, fill: u8) -> Signature {
        Signature {
            session_id: SessionId(id),
            r: vec![fill; 32],
            s: vec![fill.wrapping_add(1); 32],
        }
    }

    #[test]
    fn store_then_get() {
        let mut registry = SignatureRegistry::new(MemoryStore::new());
        assert_eq!(registry.get(SessionId(1)).unwrap(), None);
        registry.store(&signature(1, 7)).unwrap();
        assert_eq!(registry.get(SessionId(1)).unwrap(), Some(signature(1, 7)));
        assert_eq!(registry.get(SessionId(2)).unwrap(), None);
    }

    #[test]
    fn second_store_is_rejected_and_keeps_first() {
        let mut registry = SignatureRegistry::new(MemoryStore::new());
        registry.store(&signature(1, 7)).unwrap();
        assert_eq!(
            registry.store(&signature(1, 9)).unwrap_err(),
            TssError::AlreadyStored(SessionId(1))
        );
        assert_eq!(registry.get(SessionId(1)).unwrap(), Some(signature(1, 7)));
    }
}
