use crate::error::StorageError;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use std::sync::atomic::{AtomicBool, Ordering};

/// Column families used by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// address → Account
    Accounts,
    /// address → (position, Validator)
    Validators,
    /// address → Contract
    Contracts,
    /// address → ContractStorage
    ContractStorage,
    /// big-endian block index → Block
    Blocks,
    /// block hash → big-endian block index
    BlockHashes,
    /// tx hash → big-endian block index
    Transactions,
    /// tx hash → pending Transaction
    Mempool,
}

impl ColumnFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Accounts => "accounts",
            ColumnFamily::Validators => "validators",
            ColumnFamily::Contracts => "contracts",
            ColumnFamily::ContractStorage => "contract_storage",
            ColumnFamily::Blocks => "blocks",
            ColumnFamily::BlockHashes => "block_hashes",
            ColumnFamily::Transactions => "transactions",
            ColumnFamily::Mempool => "mempool",
        }
    }

    pub fn all() -> Vec<ColumnFamily> {
        vec![
            ColumnFamily::Accounts,
            ColumnFamily::Validators,
            ColumnFamily::Contracts,
            ColumnFamily::ContractStorage,
            ColumnFamily::Blocks,
            ColumnFamily::BlockHashes,
            ColumnFamily::Transactions,
            ColumnFamily::Mempool,
        ]
    }
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Block cache size in MB
    pub cache_size_mb: usize,
    /// Max open files
    pub max_open_files: i32,
    /// Write buffer size in MB
    pub write_buffer_size_mb: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cache_size_mb: 64,
            max_open_files: 512,
            write_buffer_size_mb: 16,
        }
    }
}

/// RocksDB wrapper with one column family per ledger table.
pub struct Database {
    db: Arc<DB>,
    path: PathBuf,
    #[cfg(any(test, feature = "test-util"))]
    fail_writes: AtomicBool,
}

impl Database {
    /// Open with default options.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_config(path, &DatabaseConfig::default())
    }

    pub fn open_with_config(path: &Path, config: &DatabaseConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);

        let cache = rocksdb::Cache::new_lru_cache(config.cache_size_mb * 1024 * 1024);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::all()
            .into_iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        tracing::debug!(path = %path.display(), "Database opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            #[cfg(any(test, feature = "test-util"))]
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::InvalidColumnFamily(cf.name().to_string()))
    }

    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let handle = self.handle(cf)?;
        Ok(self.db.get_cf(handle, key)?)
    }

    pub fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value);
        self.write_batch(batch)
    }

    pub fn delete(&self, cf: ColumnFamily, key: &[u8]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(cf, key);
        self.write_batch(batch)
    }

    /// All entries of a column family in ascending key order.
    pub fn iter_column(&self, cf: ColumnFamily) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let handle = self.handle(cf)?;
        self.db
            .iterator_cf(handle, IteratorMode::Start)
            .map(|entry| -> Result<(Vec<u8>, Vec<u8>), StorageError> {
                let (key, value) = entry?;
                Ok((key.into_vec(), value.into_vec()))
            })
            .collect()
    }

    /// Apply a batch atomically. Operations land in the order they were added.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        #[cfg(any(test, feature = "test-util"))]
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("writes disabled".to_string()));
        }

        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put { cf, key, value } => inner.put_cf(self.handle(cf)?, key, value),
                BatchOp::Delete { cf, key } => inner.delete_cf(self.handle(cf)?, key),
                BatchOp::Clear { cf } => {
                    let handle = self.handle(cf)?;
                    for entry in self.db.iterator_cf(handle, IteratorMode::Start) {
                        let (key, _) = entry?;
                        inner.delete_cf(handle, key);
                    }
                }
            }
        }

        if let Err(e) = self.db.write(inner) {
            tracing::error!(path = %self.path.display(), error = %e, "Database write failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Make every following batch write fail until re-enabled.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

enum BatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
    Clear {
        cf: ColumnFamily,
    },
}

/// Write batch for atomic multi-key updates across column families.
#[derive(Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, cf: ColumnFamily, key: &[u8]) {
        self.ops.push(BatchOp::Delete { cf, key: key.to_vec() });
    }

    /// Drop every entry of a column family. Later puts in the same batch survive.
    pub fn clear_column(&mut self, cf: ColumnFamily) {
        self.ops.push(BatchOp::Clear { cf });
    }

    /// Move every operation of `other` to the end of this batch.
    pub fn append(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
