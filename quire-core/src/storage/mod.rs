//! Storage backends.
//!
//! A backend is one logical partition of a key-value store: record metadata
//! lives in one partition, CRDT room snapshots in another, and the two are
//! only ever related through the document id.
//!
//! ```text
//! ┌────────────────┐   id → JSON record    ┌───────────────────────┐
//! │ DocumentStore  │ ─────────────────────►│ partition "records"   │
//! └────────────────┘                       └───────────────────────┘
//! ┌────────────────┐   id → yrs snapshot   ┌───────────────────────┐
//! │ RoomSnapshots  │ ─────────────────────►│ partition "rooms"     │
//! └────────────────┘                       └───────────────────────┘
//! ```
//!
//! `list()` makes no ordering promise; callers sort.

pub mod memory;
pub mod rocks;

pub use memory::MemoryBackend;
pub use rocks::{RocksConfig, RocksPartition, RocksStorage, PARTITIONS, RECORDS, ROOMS};

use std::future::Future;

use crate::error::StorageError;

/// Async key-value partition.
///
/// Futures are `Send` so that writes can be detached onto the runtime.
pub trait StorageBackend: Send + Sync + 'static {
    /// Fetch a value, `None` when the key is absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StorageError>> + Send;

    /// Insert or overwrite a value.
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Remove a key. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// All entries, in no particular order.
    fn list(&self) -> impl Future<Output = Result<Vec<(String, Vec<u8>)>, StorageError>> + Send;
}
