//! Session Store: sessions persisted in ordered key/value ledger state.
//!
//! Layout:
//!
//! | key | value |
//! |---|---|
//! | `0x01 ‖ id` | session |
//! | `0x02` | next session id |
//! | `0x03 ‖ expiry ‖ id` | pending session, indexed by expiry height |
//! | `0x04 ‖ len(key) ‖ key ‖ scope` | pending session id for a (key, scope) pair |
//! | `0x05 ‖ id` | signature (see [`crate::registry`]) |
//! | `0x06` | last applied block height |
//!
//! Integers are big-endian so that key order is numeric order.
//!
//! Every transition stages its writes in a [`Transaction`] and commits them with a single
//! [`KvStore::write`], so a transition is either fully visible or not at all.
use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, TssError};
use crate::session::SigningSession;
use crate::types::{KeyId, SessionId};

const SESSION_PREFIX: u8 = 0x01;
const COUNTER_KEY: [u8; 1] = [0x02];
const EXPIRY_PREFIX: u8 = 0x03;
const PENDING_PREFIX: u8 = 0x04;
const HEIGHT_KEY: [u8; 1] = [0x06];

pub trait KvRead {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Entries whose key starts with `prefix`, in ascending key order.
    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

pub trait KvWrite: KvRead {
    fn set(&mut self, key: &[u8], value: Vec<u8>);
    fn delete(&mut self, key: &[u8]);
}

/// Ordered key/value view of the replicated ledger state.
pub trait KvStore: KvRead {
    /// Applies every operation in `batch` atomically.
    fn write(&mut self, batch: WriteBatch) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl<T: KvRead + ?Sized> KvRead for &T {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).prefix_iter(prefix)
    }
}

impl<T: KvRead + ?Sized> KvRead for &mut T {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).prefix_iter(prefix)
    }
}

impl<T: KvWrite + ?Sized> KvWrite for &mut T {
    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) {
        (**self).delete(key)
    }
}

impl<T: KvRead + ?Sized> KvRead for Box<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).prefix_iter(prefix)
    }
}

impl<T: KvStore + ?Sized> KvStore for Box<T> {
    fn write(&mut self, batch: WriteBatch) -> Result<()> {
        (**self).write(batch)
    }
}

/// Writes staged over a read-only base. Reads see the staged writes.
pub struct Transaction<'a, S: ?Sized> {
    base: &'a S,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KvRead + ?Sized> Transaction<'a, S> {
    pub fn new(base: &'a S) -> Self {
        Transaction {
            base,
            staged: BTreeMap::new(),
        }
    }

    pub fn into_batch(self) -> WriteBatch {
        let ops = self
            .staged
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOp::Put(key, value),
                None => BatchOp::Delete(key),
            })
            .collect();
        WriteBatch { ops }
    }
}

impl<'a, S: KvRead + ?Sized> KvRead for Transaction<'a, S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(key),
        }
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<_, _> = self.base.prefix_iter(prefix)?.into_iter().collect();
        for (key, value) in self
            .staged
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

impl<'a, S: KvRead + ?Sized> KvWrite for Transaction<'a, S> {
    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.staged.insert(key.to_vec(), Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.staged.insert(key.to_vec(), None);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full contents in key order.
    pub fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl KvRead for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl KvWrite for MemoryStore {
    fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(key.to_vec(), value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }
}

impl KvStore for MemoryStore {
    fn write(&mut self, batch: WriteBatch) -> Result<()> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| TssError::Storage(format!("encode: {}", e)))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| TssError::Storage(format!("decode: {}", e)))
}

fn session_key(id: SessionId) -> Vec<u8> {
    let mut key = vec![SESSION_PREFIX];
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn expiry_key(expires_height: u64, id: SessionId) -> Vec<u8> {
    let mut key = vec![EXPIRY_PREFIX];
    key.extend_from_slice(&expires_height.to_be_bytes());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn pending_key(key_id: &KeyId, scope: &str) -> Vec<u8> {
    let key_bytes = key_id.as_str().as_bytes();
    let mut key = vec![PENDING_PREFIX];
    key.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(key_bytes);
    key.extend_from_slice(scope.as_bytes());
    key
}

fn id_from_suffix(key: &[u8]) -> Result<SessionId> {
    let start = key
        .len()
        .checked_sub(8)
        .ok_or_else(|| TssError::Storage("truncated index key".into()))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[start..]);
    Ok(SessionId::from_be_bytes(bytes))
}

pub struct SessionStore<S> {
    kv: S,
}

impl<S> SessionStore<S> {
    pub fn new(kv: S) -> Self {
        SessionStore { kv }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }
}

impl<S: KvRead> SessionStore<S> {
    pub fn get(&self, id: SessionId) -> Result<Option<SigningSession>> {
        self.kv
            .get(&session_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// The pending session for a (key, scope) pair, if any.
    pub fn pending_for(&self, key_id: &KeyId, scope: &str) -> Result<Option<SessionId>> {
        match self.kv.get(&pending_key(key_id, scope))? {
            Some(bytes) => id_from_suffix(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Pending sessions whose expiry height is strictly below `height`, in (expiry, id) order.
    pub fn expiring_before(&self, height: u64) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        for (key, _) in self.kv.prefix_iter(&[EXPIRY_PREFIX])? {
            if key.len() != 17 {
                return Err(TssError::Storage("malformed expiry index key".into()));
            }
            let mut expiry = [0u8; 8];
            expiry.copy_from_slice(&key[1..9]);
            if u64::from_be_bytes(expiry) >= height {
                break;
            }
            ids.push(id_from_suffix(&key)?);
        }
        Ok(ids)
    }

    /// All pending sessions in id order.
    pub fn pending(&self) -> Result<Vec<SigningSession>> {
        let mut sessions = Vec::new();
        for (key, _) in self.kv.prefix_iter(&[EXPIRY_PREFIX])? {
            let id = id_from_suffix(&key)?;
            let session = self.get(id)?.ok_or_else(|| {
                TssError::Storage(format!("expiry index points at missing session {}", id))
            })?;
            sessions.push(session);
        }
        sessions.sort_by_key(|s| s.id);
        Ok(sessions)
    }

    /// Last block height an expiry tick was applied at, 0 before the first tick.
    pub fn height(&self) -> Result<u64> {
        match self.kv.get(&HEIGHT_KEY)? {
            Some(bytes) => read_u64(&bytes, "corrupt block height"),
            None => Ok(0),
        }
    }
}

impl<S: KvWrite> SessionStore<S> {
    /// Reserves the next session identifier. Identifiers start at 1 and are never reused.
    pub fn next_id(&mut self) -> Result<SessionId> {
        let next = match self.kv.get(&COUNTER_KEY)? {
            Some(bytes) => read_u64(&bytes, "corrupt session counter")?,
            None => 1,
        };
        let after = next
            .checked_add(1)
            .ok_or_else(|| TssError::Storage("session counter exhausted".into()))?;
        self.kv.set(&COUNTER_KEY, after.to_be_bytes().to_vec());
        Ok(SessionId(next))
    }

    /// Persists a freshly opened session together with its pending indexes.
    pub fn insert(&mut self, session: &SigningSession) -> Result<()> {
        let key = session_key(session.id);
        if self.kv.get(&key)?.is_some() {
            return Err(TssError::Internal(format!(
                "session {} already exists",
                session.id
            )));
        }
        let value = encode(session)?;
        self.kv.set(&key, value);
        if !session.status.is_terminal() {
            let id = session.id.to_be_bytes().to_vec();
            self.kv
                .set(&expiry_key(session.expires_height, session.id), id.clone());
            self.kv.set(&pending_key(&session.key_id, &session.scope), id);
        }
        Ok(())
    }

    /// Writes back a mutated session. Terminal sessions drop out of the pending indexes.
    pub fn update(&mut self, session: &SigningSession) -> Result<()> {
        let key = session_key(session.id);
        if self.kv.get(&key)?.is_none() {
            return Err(TssError::UnknownSession(session.id));
        }
        let value = encode(session)?;
        self.kv.set(&key, value);
        if session.status.is_terminal() {
            self.kv
                .delete(&expiry_key(session.expires_height, session.id));
            let pending = pending_key(&session.key_id, &session.scope);
            if self.kv.get(&pending)? == Some(session.id.to_be_bytes().to_vec()) {
                self.kv.delete(&pending);
            }
        }
        Ok(())
    }

    pub fn set_height(&mut self, height: u64) {
        self.kv.set(&HEIGHT_KEY, height.to_be_bytes().to_vec());
    }
}

fn read_u64(bytes: &[u8], what: &str) -> Result<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TssError::Storage(what.into()))?;
    Ok(u64::from_be_bytes(bytes))
}
