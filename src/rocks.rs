//! RocksDB-backed [`KvStore`]. A [`WriteBatch`] maps onto one `rocksdb::WriteBatch`, so each
//! transition is durable as a unit.
use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, DB};
use tracing::{debug, info};

use crate::error::{Result, TssError};
use crate::store::{BatchOp, KvRead, KvStore, WriteBatch};

fn storage_err(operation: &str, err: rocksdb::Error) -> TssError {
    TssError::Storage(format!("rocksdb {}: {}", operation, err))
}

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Opens the database at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening rocksdb store");
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_use_fsync(true);
        options.set_paranoid_checks(true);
        let db = DB::open(&options, path).map_err(|e| storage_err("open", e))?;
        info!(path = %path.display(), "rocksdb store opened");
        Ok(RocksStore { db })
    }
}

impl KvRead for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get(key).map_err(|e| storage_err("get", e))
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| storage_err("iterator", e))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }
}

impl KvStore for RocksStore {
    fn write(&mut self, batch: WriteBatch) -> Result<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => rocks_batch.put(key, value),
                BatchOp::Delete(key) => rocks_batch.delete(key),
            }
        }
        self.db.write(rocks_batch).map_err(|e| storage_err("write", e))
    }
}
