//! Seam between the session manager and a CRDT synchronization engine.
//!
//! The engine connects a fresh [`DocumentHandle`] to a room and reports back
//! through a [`SyncNotifier`]. Every notification is stamped with the room and
//! the session epoch it was issued for, so the manager can recognise and drop
//! notifications from a connection it has already torn down.
//!
//! ```text
//! SessionManager ── connect(room, doc, notifier) ──► CrdtEngine
//!       ▲                                               │
//!       │        SessionEvent { room, epoch, signal }   │
//!       └──────────────── mpsc (unbounded) ◄────────────┘
//! ```

use std::future::Future;
use tokio::sync::mpsc;

use crate::document::DocumentHandle;
use crate::error::Result;
use quire_core::DocumentId;

/// What an engine reports about a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// Initial reconciliation with the authoritative replica completed
    Synced,
    /// The connection failed and will not recover on its own
    Failed(String),
}

/// A notification tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub room: DocumentId,
    pub epoch: u64,
    pub signal: SyncSignal,
}

/// Handed to the engine on connect; the only way it talks back.
#[derive(Debug, Clone)]
pub struct SyncNotifier {
    room: DocumentId,
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SyncNotifier {
    pub(crate) fn new(room: DocumentId, epoch: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { room, epoch, tx }
    }

    pub fn room(&self) -> &DocumentId {
        &self.room
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn synced(&self) {
        self.send(SyncSignal::Synced);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(SyncSignal::Failed(reason.into()));
    }

    fn send(&self, signal: SyncSignal) {
        // A closed channel means the manager is gone; nobody is listening.
        let _ = self.tx.send(SessionEvent {
            room: self.room,
            epoch: self.epoch,
            signal,
        });
    }
}

/// A live connection between one document handle and its room.
pub trait Connection: Send + Sync {
    /// Whether the initial sync has completed.
    fn is_synced(&self) -> bool;

    /// Push local edits made since the last flush to the room.
    fn flush(&self) -> impl Future<Output = Result<()>> + Send;

    /// Stop synchronizing. Idempotent.
    fn destroy(&mut self);
}

/// Factory for connections.
pub trait CrdtEngine {
    type Connection: Connection;

    /// Bind `document` to `room`. Must not report through `notifier` for any
    /// other room.
    fn connect(
        &self,
        room: &DocumentId,
        document: &DocumentHandle,
        notifier: SyncNotifier,
    ) -> Result<Self::Connection>;
}
