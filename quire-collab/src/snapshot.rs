//! Room snapshot persistence.
//!
//! Full yrs state per room, LZ4-compressed, keyed by document id in the
//! `rooms` partition. Independent of the record partition: deleting one does
//! not touch the other.

use std::sync::Arc;

use crate::error::{Result, SessionError};
use quire_core::{DocumentId, StorageBackend};

pub struct RoomSnapshots<B: StorageBackend> {
    backend: Arc<B>,
}

impl<B: StorageBackend> RoomSnapshots<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Store `state` (a yrs update encoding the full document).
    /// Returns the compressed size.
    pub async fn save(&self, room: &DocumentId, state: &[u8]) -> Result<usize> {
        let compressed = lz4_flex::compress_prepend_size(state);
        let len = compressed.len();
        self.backend.put(&room.key(), compressed).await?;
        Ok(len)
    }

    pub async fn load(&self, room: &DocumentId) -> Result<Option<Vec<u8>>> {
        match self.backend.get(&room.key()).await? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| SessionError::Crdt(format!("corrupt snapshot for room {room}: {e}"))),
            None => Ok(None),
        }
    }

    /// Forget a room's CRDT state entirely.
    pub async fn purge(&self, room: &DocumentId) -> Result<()> {
        self.backend.delete(&room.key()).await?;
        log::info!("Purged room {room}");
        Ok(())
    }
}
