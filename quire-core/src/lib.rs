//! # quire-core — Document identity and lifecycle
//!
//! Keeps a mutable, human-readable slug consistent with an immutable storage
//! key across create, rename, archive, restore and delete.
//!
//! ## Modules
//!
//! - [`identity`] — `DocumentId`, slug validation, generated slugs
//! - [`record`] — `DocumentRecord` and `RecordPatch`
//! - [`store`] — `DocumentStore`, the record operations
//! - [`storage`] — `StorageBackend` partitions (in-memory, RocksDB)
//! - [`error`] — `RecordError` / `StorageError`
//!
//! ## Outcomes
//!
//! | Error                | Cause                                   | Retry? |
//! |----------------------|-----------------------------------------|--------|
//! | `Validation`         | bad slug, patch touching id/slug        | no     |
//! | `Conflict`           | slug held by another record             | no     |
//! | `NotFound`           | unknown id or slug                      | no     |
//! | `PreconditionFailed` | delete before archive                   | no     |
//! | `Transport`          | storage failure                         | caller |

pub mod error;
pub mod identity;
pub mod record;
pub mod storage;
pub mod store;

pub use error::{RecordError, Result, StorageError};
pub use identity::{now_millis, random_slug, validate_slug, DocumentId};
pub use record::{DocumentRecord, RecordPatch};
pub use storage::{MemoryBackend, RocksConfig, RocksPartition, RocksStorage, StorageBackend};
pub use store::{DocumentStore, StoreConfig};
