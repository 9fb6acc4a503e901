//! Manager-owned CRDT document handle.
//!
//! One yrs `Doc` per session. Independently synchronized fields share that doc
//! as separate text roots named `<roomId>-<field>`:
//!
//! ```text
//! Doc (room 3f2c…)
//! ├── "3f2c…-title"    Text
//! └── "3f2c…-content"  Text
//! ```
//!
//! Consumers get clones of the handle but cannot destroy it; once the
//! session manager tears it down every accessor returns
//! [`SessionError::Destroyed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, TransactionMut, Update};

use crate::error::{Result, SessionError};
use quire_core::DocumentId;

pub const TITLE_FIELD: &str = "title";
pub const CONTENT_FIELD: &str = "content";

/// Name of a field's text root within a room's document.
pub fn region_name(room: &DocumentId, field: &str) -> String {
    format!("{room}-{field}")
}

struct HandleInner {
    room: DocumentId,
    /// Serializes transactions; yrs refuses concurrent ones on one doc.
    doc: Mutex<Doc>,
    destroyed: AtomicBool,
}

/// Shared reference to a session's CRDT document.
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<HandleInner>,
}

impl DocumentHandle {
    pub(crate) fn new(room: DocumentId) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                room,
                doc: Mutex::new(Doc::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn room(&self) -> &DocumentId {
        &self.inner.room
    }

    pub fn region_name(&self, field: &str) -> String {
        region_name(&self.inner.room, field)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Only the session manager destroys handles.
    pub(crate) fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
    }

    /// Whether two handles refer to the same document instance.
    pub fn same_instance(&self, other: &DocumentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Doc>> {
        if self.is_destroyed() {
            return Err(SessionError::Destroyed(self.inner.room));
        }
        self.inner
            .doc
            .lock()
            .map_err(|_| SessionError::Crdt("document lock poisoned".into()))
    }

    // ─── Regions ──────────────────────────────────────────────────────

    /// Run `f` inside a write transaction on the field's text root.
    pub fn with_region<R>(
        &self,
        field: &str,
        f: impl FnOnce(&mut TransactionMut, &TextRef) -> R,
    ) -> Result<R> {
        let doc = self.lock()?;
        let text = doc.get_or_insert_text(self.region_name(field));
        let mut txn = doc.transact_mut();
        Ok(f(&mut txn, &text))
    }

    pub fn read_region(&self, field: &str) -> Result<String> {
        let doc = self.lock()?;
        let text = doc.get_or_insert_text(self.region_name(field));
        let txn = doc.transact();
        Ok(text.get_string(&txn))
    }

    /// Replace the whole field with `value`.
    pub fn replace_region(&self, field: &str, value: &str) -> Result<()> {
        self.with_region(field, |txn, text| {
            let len = text.len(&*txn);
            if len > 0 {
                text.remove_range(txn, 0, len);
            }
            if !value.is_empty() {
                text.insert(txn, 0, value);
            }
        })
    }

    pub fn append_region(&self, field: &str, value: &str) -> Result<()> {
        self.with_region(field, |txn, text| {
            let len = text.len(&*txn);
            text.insert(txn, len, value);
        })
    }

    // ─── Sync Primitives ──────────────────────────────────────────────

    /// Encoded state vector of the local replica.
    pub fn state_vector(&self) -> Result<Vec<u8>> {
        let doc = self.lock()?;
        let txn = doc.transact();
        Ok(txn.state_vector().encode_v1())
    }

    /// Everything the holder of `state_vector` is missing.
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| SessionError::Crdt(e.to_string()))?;
        let doc = self.lock()?;
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| SessionError::Crdt(e.to_string()))?;
        let doc = self.lock()?;
        let mut txn = doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SessionError::Crdt(e.to_string()))
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("room", &self.inner.room)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
