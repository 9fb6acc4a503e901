//! RocksDB-backed partitions.
//!
//! One column family per partition:
//! - `records` — JSON document records keyed by document id
//! - `rooms`   — compressed CRDT room snapshots keyed by document id
//!
//! Both partitions share one database handle; a [`RocksPartition`] is a cheap
//! clone bound to a single column family.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, IteratorMode, Options, SingleThreaded, WriteOptions,
};
use std::path::PathBuf;
use std::sync::Arc;

use super::StorageBackend;
use crate::error::StorageError;

pub const RECORDS: &str = "records";
pub const ROOMS: &str = "rooms";

/// All partition names, created on open.
pub const PARTITIONS: &[&str] = &[RECORDS, ROOMS];

type Db = DBWithThreadMode<SingleThreaded>;

/// RocksDB configuration.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files (default: 256)
    pub max_open_files: i32,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("quire_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl RocksConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// An open database holding every partition.
pub struct RocksStorage {
    db: Arc<Db>,
    config: RocksConfig,
}

impl RocksStorage {
    /// Open (or create) the database and all partitions.
    pub fn open(config: RocksConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = PARTITIONS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = Db::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)?;
        log::info!("Opened storage at {}", config.path.display());

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    fn cf_options(name: &str, config: &RocksConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            RECORDS => {
                // Small JSON values, scanned for slug lookups
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            ROOMS => {
                // Snapshots arrive already compressed
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    /// Handle bound to one partition.
    pub fn partition(&self, name: &str) -> Result<RocksPartition, StorageError> {
        let cf = PARTITIONS
            .iter()
            .copied()
            .find(|p| *p == name)
            .ok_or_else(|| StorageError::UnknownPartition(name.to_string()))?;
        Ok(RocksPartition {
            db: self.db.clone(),
            cf,
            sync_writes: self.config.sync_writes,
        })
    }

    pub fn records(&self) -> Result<RocksPartition, StorageError> {
        self.partition(RECORDS)
    }

    pub fn rooms(&self) -> Result<RocksPartition, StorageError> {
        self.partition(ROOMS)
    }

    pub fn config(&self) -> &RocksConfig {
        &self.config
    }
}

/// One column family of a [`RocksStorage`].
#[derive(Clone)]
pub struct RocksPartition {
    db: Arc<Db>,
    cf: &'static str,
    sync_writes: bool,
}

impl RocksPartition {
    pub fn name(&self) -> &'static str {
        self.cf
    }

    /// Run a RocksDB call on the blocking pool; the calls block on disk I/O
    /// and must not stall runtime workers.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db, &ColumnFamily, WriteOptions) -> Result<T, StorageError> + Send + 'static,
    {
        let db = self.db.clone();
        let cf = self.cf;
        let sync_writes = self.sync_writes;
        tokio::task::spawn_blocking(move || {
            let handle = db
                .cf_handle(cf)
                .ok_or_else(|| StorageError::UnknownPartition(cf.to_string()))?;
            let mut opts = WriteOptions::default();
            opts.set_sync(sync_writes);
            op(&db, handle, opts)
        })
        .await
        .map_err(|e| StorageError::Database(format!("storage task failed: {e}")))?
    }
}

impl StorageBackend for RocksPartition {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        self.blocking(move |db, cf, _| Ok(db.get_cf(cf, key.as_bytes())?))
            .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.blocking(move |db, cf, opts| Ok(db.put_cf_opt(cf, key.as_bytes(), value, &opts)?))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        self.blocking(move |db, cf, opts| Ok(db.delete_cf_opt(cf, key.as_bytes(), &opts)?))
            .await
    }

    async fn list(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.blocking(|db, cf, _| {
            let mut entries = Vec::new();
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                entries.push((String::from_utf8_lossy(&key).into_owned(), value.into_vec()));
            }
            Ok(entries)
        })
        .await
    }
}
