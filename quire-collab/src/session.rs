//! Collaboration session manager.
//!
//! Owns the single live CRDT document and connection. Switching rooms always
//! tears the old session down completely before the new one is built:
//!
//! ```text
//! request_session(B) while A is live
//!
//!   A.connection.destroy()  ─┐
//!   A.document.destroy()     │ teardown
//!   A.state = Absent         │
//!   A.listeners dropped     ─┘
//!   epoch += 1
//!   B.document = new        ─┐
//!   B.connection = connect   │ construct
//!   B.state = Connecting    ─┘
//! ```
//!
//! Engine notifications carry `(room, epoch)`; anything not addressed to the
//! live session is dropped. A late `Synced` from A can therefore never mark B
//! (or a later A) as synced.

use tokio::sync::{mpsc, watch};

use crate::document::DocumentHandle;
use crate::engine::{Connection, CrdtEngine, SessionEvent, SyncNotifier, SyncSignal};
use crate::error::{Result, SessionError};
use quire_core::DocumentId;

/// Lifecycle of the live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Connecting,
    Synced,
    /// Terminal until the session is requested again
    Failed(String),
}

impl SessionState {
    pub fn is_synced(&self) -> bool {
        matches!(self, SessionState::Synced)
    }

    fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Synced)
    }
}

/// Identifies a registered `on_synced` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A consumer's view of a session. Borrowed: it can read and edit the
/// document but never destroy it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    room: DocumentId,
    epoch: u64,
    document: DocumentHandle,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn room(&self) -> &DocumentId {
        &self.room
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.document
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_synced_now(&self) -> bool {
        self.state.borrow().is_synced()
    }

    /// Resolve once synced. Resolves immediately if that already happened;
    /// fails if the session is torn down or fails first.
    pub async fn wait_synced(&self) -> Result<()> {
        let mut rx = self.state.clone();
        let settled = rx
            .wait_for(|state| !matches!(state, SessionState::Connecting))
            .await
            .map_err(|_| SessionError::Closed(self.room))?
            .clone();

        match settled {
            SessionState::Synced => Ok(()),
            SessionState::Failed(reason) => Err(SessionError::Failed {
                room: self.room,
                reason,
            }),
            _ => Err(SessionError::Closed(self.room)),
        }
    }
}

type Listener = Box<dyn FnOnce() + Send>;

struct LiveSession<C> {
    room: DocumentId,
    epoch: u64,
    document: DocumentHandle,
    connection: C,
    state: watch::Sender<SessionState>,
    listeners: Vec<(ListenerId, Listener)>,
}

impl<C> LiveSession<C> {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            room: self.room,
            epoch: self.epoch,
            document: self.document.clone(),
            state: self.state.subscribe(),
        }
    }

    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

/// Owner of the one live collaboration session.
///
/// Not a global: each instance is an independent client, which is what the
/// tests rely on.
pub struct SessionManager<E: CrdtEngine> {
    engine: E,
    live: Option<LiveSession<E::Connection>>,
    next_epoch: u64,
    next_listener: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<E: CrdtEngine> SessionManager<E> {
    pub fn new(engine: E) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            live: None,
            next_epoch: 1,
            next_listener: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Room of the live session, if any.
    pub fn current_room(&self) -> Option<DocumentId> {
        self.live.as_ref().map(|live| live.room)
    }

    pub fn state(&self) -> SessionState {
        self.live
            .as_ref()
            .map_or(SessionState::Absent, LiveSession::current)
    }

    /// Handle to the live session, if any.
    pub fn current(&self) -> Option<SessionHandle> {
        self.live.as_ref().map(LiveSession::handle)
    }

    /// Get a session for `room`.
    ///
    /// Re-requesting the live room while it is connecting or synced returns
    /// the same session. Anything else tears down first, then connects.
    pub fn request_session(&mut self, room: DocumentId) -> Result<SessionHandle> {
        if let Some(live) = &self.live {
            if live.room == room && live.current().is_live() {
                return Ok(live.handle());
            }
        }

        self.teardown();

        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let document = DocumentHandle::new(room);
        let notifier = SyncNotifier::new(room, epoch, self.events_tx.clone());
        let connection = match self.engine.connect(&room, &document, notifier) {
            Ok(connection) => connection,
            Err(e) => {
                document.destroy();
                log::warn!("Could not connect to room {room}: {e}");
                return Err(e);
            }
        };

        let (state, _) = watch::channel(SessionState::Connecting);
        let live = LiveSession {
            room,
            epoch,
            document,
            connection,
            state,
            listeners: Vec::new(),
        };
        let handle = live.handle();
        self.live = Some(live);

        log::info!("Session for room {room} connecting (epoch {epoch})");
        Ok(handle)
    }

    /// Tear down the live session, leaving none.
    pub fn close(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        live.connection.destroy();
        live.document.destroy();
        live.state.send_replace(SessionState::Absent);
        if !live.listeners.is_empty() {
            log::debug!(
                "Dropping {} pending listener(s) for room {}",
                live.listeners.len(),
                live.room
            );
        }
        log::info!("Session for room {} torn down (epoch {})", live.room, live.epoch);
    }

    // ─── Notifications ────────────────────────────────────────────────

    /// Apply one engine notification. Returns whether it changed the live
    /// session; stale or redundant notifications are dropped.
    pub fn dispatch(&mut self, event: SessionEvent) -> bool {
        let Some(live) = self.live.as_mut() else {
            log::debug!("Dropping {:?} for room {}: no live session", event.signal, event.room);
            return false;
        };
        if live.room != event.room || live.epoch != event.epoch {
            log::debug!(
                "Dropping stale {:?} for room {} (epoch {}, live {} epoch {})",
                event.signal,
                event.room,
                event.epoch,
                live.room,
                live.epoch
            );
            return false;
        }

        match event.signal {
            SyncSignal::Synced => {
                if live.current() != SessionState::Connecting {
                    return false;
                }
                live.state.send_replace(SessionState::Synced);
                log::info!("Session for room {} synced", live.room);
                for (_, listener) in live.listeners.drain(..) {
                    listener();
                }
            }
            SyncSignal::Failed(reason) => {
                if !live.current().is_live() {
                    return false;
                }
                log::warn!("Session for room {} failed: {reason}", live.room);
                live.state.send_replace(SessionState::Failed(reason));
                live.listeners.clear();
            }
        }
        true
    }

    /// Apply every queued notification without waiting. Returns how many
    /// changed the live session.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.dispatch(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next notification that changes the live session.
    pub async fn next_transition(&mut self) -> SessionState {
        loop {
            // The manager holds a sender, so the channel never closes.
            let Some(event) = self.events_rx.recv().await else {
                return self.state();
            };
            if self.dispatch(event) {
                return self.state();
            }
        }
    }

    /// Drive notifications until `handle`'s session syncs or settles
    /// otherwise.
    pub async fn sync(&mut self, handle: &SessionHandle) -> Result<()> {
        loop {
            self.pump();
            match self.state_of(handle) {
                Some(SessionState::Synced) => return Ok(()),
                Some(SessionState::Connecting) => {
                    self.next_transition().await;
                }
                Some(SessionState::Failed(reason)) => {
                    return Err(SessionError::Failed {
                        room: handle.room,
                        reason,
                    })
                }
                _ => return Err(SessionError::Closed(handle.room)),
            }
        }
    }

    fn state_of(&self, handle: &SessionHandle) -> Option<SessionState> {
        self.live
            .as_ref()
            .filter(|live| live.room == handle.room && live.epoch == handle.epoch)
            .map(LiveSession::current)
    }

    // ─── Listeners ────────────────────────────────────────────────────

    /// Call `callback` once `handle`'s session is synced; immediately if it
    /// already is. The callback is discarded if the session is torn down or
    /// fails first.
    pub fn on_synced(
        &mut self,
        handle: &SessionHandle,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;

        let live = self
            .live
            .as_mut()
            .filter(|live| live.room == handle.room && live.epoch == handle.epoch)
            .ok_or(SessionError::Closed(handle.room))?;

        match live.current() {
            SessionState::Synced => callback(),
            SessionState::Connecting => live.listeners.push((id, Box::new(callback))),
            SessionState::Failed(reason) => {
                return Err(SessionError::Failed {
                    room: handle.room,
                    reason,
                })
            }
            SessionState::Absent => return Err(SessionError::Closed(handle.room)),
        }
        Ok(id)
    }

    /// Remove a pending callback. Returns whether it was still pending.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let Some(live) = self.live.as_mut() else {
            return false;
        };
        let before = live.listeners.len();
        live.listeners.retain(|(listener, _)| *listener != id);
        live.listeners.len() != before
    }

    // ─── Editing ──────────────────────────────────────────────────────

    /// Push local edits of the live session to its room.
    pub async fn flush(&self) -> Result<()> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| SessionError::Transport("no live session".into()))?;
        if !live.current().is_synced() {
            return Err(SessionError::Transport(format!(
                "session for room {} is not synced",
                live.room
            )));
        }
        if !live.connection.is_synced() {
            return Err(SessionError::Transport(format!(
                "connection for room {} lost sync",
                live.room
            )));
        }
        live.connection.flush().await
    }
}

impl<E: CrdtEngine> Drop for SessionManager<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}
