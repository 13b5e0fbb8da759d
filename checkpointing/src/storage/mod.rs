/// RocksDB persistence for checkpointing state
/// 
/// Persists checkpoints, BLS key registrations, per-epoch validator BLS
/// sets, and epoch bookkeeping in
/// dedicated column families. Multi-key mutations go through a single
/// `WriteBatch` so they land all-or-nothing.

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub const CF_CHECKPOINTS: &str = "checkpoints";
pub const CF_BLS_KEYS: &str = "bls_keys";
pub const CF_BLS_KEY_SET: &str = "bls_key_set";
pub const CF_VAL_BLS_SET: &str = "val_bls_set";
pub const CF_METADATA: &str = "metadata";

/// Metadata keys
pub const KEY_TIP_EPOCH: &[u8] = b"tip_epoch";
pub const KEY_LAST_CONFIRMED_EPOCH: &[u8] = b"last_confirmed_epoch";
pub const KEY_LAST_FINALIZED_EPOCH: &[u8] = b"last_finalized_epoch";

/// Encode a value for storage
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Decode a stored value
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Epoch key; big-endian so key order is epoch order
pub fn epoch_key(epoch: u64) -> [u8; 8] {
    epoch.to_be_bytes()
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::InvalidData("Invalid u64 bytes".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Handle on the checkpointing database
pub struct Storage {
    db: DB,
    // keeps a temporary database directory alive for the lifetime of the handle
    _temp_dir: Option<tempfile::TempDir>,
}

impl Storage {
    /// Open (or create) the database at `path` with every column family
    pub fn new(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLS_KEYS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLS_KEY_SET, Options::default()),
            ColumnFamilyDescriptor::new(CF_VAL_BLS_SET, Options::default()),
            ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db, _temp_dir: None })
    }

    /// Create a throwaway storage in a temporary directory
    pub fn new_temp() -> Result<Self> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let mut storage = Self::new(temp_dir.path())?;
        storage._temp_dir = Some(temp_dir);
        Ok(storage)
    }

    /// Read a raw value
    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.get_cf(cf)?;
        Ok(self.db.get_cf(handle, key)?)
    }

    /// Read and decode a value
    pub fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a key exists
    pub fn contains(&self, cf: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Write a single raw value
    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let handle = self.get_cf(cf)?;
        self.db.put_cf(handle, key, value)?;
        Ok(())
    }

    /// Delete a single key
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        let handle = self.get_cf(cf)?;
        self.db.delete_cf(handle, key)?;
        Ok(())
    }

    /// Stage writes through `f` and commit them as one batch
    pub fn batch_write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Self, &mut WriteBatch) -> Result<()>,
    {
        let mut batch = WriteBatch::default();
        f(self, &mut batch)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Iterate a column family from the highest key down, decoding values,
    /// until `visit` returns `false`
    pub fn for_each_reverse<T, F>(&self, cf: &str, mut visit: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(&[u8], T) -> bool,
    {
        let handle = self.get_cf(cf)?;
        for item in self.db.iterator_cf(handle, IteratorMode::End) {
            let (key, value) = item?;
            let decoded: T = decode(&value)?;
            if !visit(&key, decoded) {
                break;
            }
        }
        Ok(())
    }

    /// Read a metadata counter
    pub fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.get(CF_METADATA, key)? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage a metadata counter update in a batch
    pub fn put_meta_u64(&self, batch: &mut WriteBatch, key: &[u8], value: u64) -> Result<()> {
        let handle = self.get_cf(CF_METADATA)?;
        batch.put_cf(handle, key, value.to_be_bytes());
        Ok(())
    }

    /// Column family handle by name
    pub fn get_cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::InvalidData(format!("Column family not found: {}", name)))
    }
}
