//! Consumer-side render gate.
//!
//! The manager's `Synced` arrives asynchronously, so a consumer that only
//! waits for it keeps showing whatever it rendered last, i.e. the previous
//! room's document, until the new room syncs. The gate closes the window: it
//! is re-armed synchronously, in the same call that requests the new room,
//! and only opens for a sync of the room that was asked for last.

use crate::document::DocumentHandle;
use crate::engine::CrdtEngine;
use crate::error::{Result, SessionError};
use crate::session::{SessionHandle, SessionManager, SessionState};
use quire_core::DocumentId;

/// Whether it is safe to attach an editable surface, and for which room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RenderGate {
    #[default]
    Absent,
    Connecting(DocumentId),
    Synced(DocumentId),
}

impl RenderGate {
    /// Close the gate for a new request.
    pub fn arm(&mut self, room: DocumentId) {
        *self = RenderGate::Connecting(room);
    }

    pub fn reset(&mut self) {
        *self = RenderGate::Absent;
    }

    /// The room the gate is waiting on or open for.
    pub fn room(&self) -> Option<&DocumentId> {
        match self {
            RenderGate::Absent => None,
            RenderGate::Connecting(room) | RenderGate::Synced(room) => Some(room),
        }
    }

    /// Feed a session state observed for `room`. Observations for any room
    /// other than the requested one are ignored. Returns whether the gate
    /// changed.
    pub fn observe(&mut self, room: &DocumentId, state: &SessionState) -> bool {
        if self.room() != Some(room) {
            return false;
        }
        let next = match state {
            SessionState::Synced => RenderGate::Synced(*room),
            SessionState::Connecting => RenderGate::Connecting(*room),
            SessionState::Absent | SessionState::Failed(_) => RenderGate::Absent,
        };
        if *self == next {
            return false;
        }
        *self = next;
        true
    }

    pub fn can_render(&self, room: &DocumentId) -> bool {
        matches!(self, RenderGate::Synced(open) if open == room)
    }
}

/// An editor surface that follows the active document.
#[derive(Debug, Default)]
pub struct SessionConsumer {
    gate: RenderGate,
    session: Option<SessionHandle>,
}

impl SessionConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Switch to `room`. The gate is closed before the manager is asked, so
    /// nothing renders until this room's own sync is observed.
    pub fn open<E: CrdtEngine>(
        &mut self,
        manager: &mut SessionManager<E>,
        room: DocumentId,
    ) -> Result<&SessionHandle> {
        self.gate.arm(room);
        self.session = None;

        let handle = match manager.request_session(room) {
            Ok(handle) => handle,
            Err(e) => {
                self.gate.reset();
                return Err(e);
            }
        };
        self.gate.observe(&room, &handle.state());
        Ok(self.session.insert(handle))
    }

    /// Re-read the session state into the gate. Returns whether it changed.
    pub fn refresh(&mut self) -> bool {
        match &self.session {
            Some(handle) => self.gate.observe(handle.room(), &handle.state()),
            None => false,
        }
    }

    /// Wait for the requested room to sync and open the gate.
    pub async fn ready<E: CrdtEngine>(
        &mut self,
        manager: &mut SessionManager<E>,
    ) -> Result<&DocumentHandle> {
        let handle = self
            .session
            .clone()
            .ok_or_else(|| SessionError::Transport("no session requested".into()))?;
        let outcome = manager.sync(&handle).await;
        self.refresh();
        outcome?;
        self.render()
            .ok_or(SessionError::Closed(*handle.room()))
    }

    /// The document to render, only while the gate is open for it.
    pub fn render(&self) -> Option<&DocumentHandle> {
        let handle = self.session.as_ref()?;
        if self.gate.can_render(handle.room()) && !handle.document().is_destroyed() {
            Some(handle.document())
        } else {
            None
        }
    }

    /// Drop the session reference and close the gate.
    pub fn detach(&mut self) {
        self.session = None;
        self.gate.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CONTENT_FIELD;
    use crate::engine::test_engine::ManualEngine;

    #[test]
    fn test_gate_ignores_other_rooms() {
        let a = DocumentId::fresh();
        let b = DocumentId::fresh();
        let mut gate = RenderGate::default();
        gate.arm(b);

        assert!(!gate.observe(&a, &SessionState::Synced));
        assert!(!gate.can_render(&a));
        assert!(!gate.can_render(&b));

        assert!(gate.observe(&b, &SessionState::Synced));
        assert!(gate.can_render(&b));
        assert!(!gate.can_render(&a));
    }

    #[test]
    fn test_arm_closes_open_gate_synchronously() {
        let a = DocumentId::fresh();
        let b = DocumentId::fresh();
        let mut gate = RenderGate::Synced(a);
        gate.arm(b);
        assert_eq!(gate, RenderGate::Connecting(b));
        assert!(!gate.can_render(&a));
    }

    #[test]
    fn test_failure_closes_gate() {
        let a = DocumentId::fresh();
        let mut gate = RenderGate::Synced(a);
        assert!(gate.observe(&a, &SessionState::Failed("x".into())));
        assert_eq!(gate, RenderGate::Absent);
    }

    #[test]
    fn test_consumer_never_renders_previous_document() {
        let engine = ManualEngine::default();
        let mut manager = SessionManager::new(engine.clone());
        let mut consumer = SessionConsumer::new();
        let doc_a = DocumentId::fresh();
        let doc_b = DocumentId::fresh();

        // A syncs and renders
        consumer.open(&mut manager, doc_a).unwrap();
        engine.document(0).replace_region(CONTENT_FIELD, "A content").unwrap();
        engine.notifier(0).synced();
        manager.pump();
        consumer.refresh();
        assert_eq!(
            consumer.render().unwrap().read_region(CONTENT_FIELD).unwrap(),
            "A content"
        );

        // Switching closes the gate in the same call
        consumer.open(&mut manager, doc_b).unwrap();
        assert!(consumer.render().is_none());
        assert_eq!(consumer.gate(), &RenderGate::Connecting(doc_b));

        // A late notification for A changes nothing
        engine.notifier(0).synced();
        manager.pump();
        consumer.refresh();
        assert!(consumer.render().is_none());

        engine.notifier(1).synced();
        manager.pump();
        consumer.refresh();
        let rendered = consumer.render().unwrap();
        assert_eq!(rendered.room(), &doc_b);
        assert_eq!(rendered.read_region(CONTENT_FIELD).unwrap(), "");
    }

    #[test]
    fn test_reopening_synced_room_renders_at_once() {
        let engine = ManualEngine::default();
        let mut manager = SessionManager::new(engine.clone());
        let mut consumer = SessionConsumer::new();
        let room = DocumentId::fresh();

        consumer.open(&mut manager, room).unwrap();
        engine.notifier(0).synced();
        manager.pump();

        consumer.open(&mut manager, room).unwrap();
        assert!(consumer.render().is_some());
        assert_eq!(engine.connect_count(), 1);
    }

    #[test]
    fn test_failed_open_resets_gate() {
        let engine = ManualEngine::default();
        engine
            .refuse
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut manager = SessionManager::new(engine);
        let mut consumer = SessionConsumer::new();

        assert!(consumer.open(&mut manager, DocumentId::fresh()).is_err());
        assert_eq!(consumer.gate(), &RenderGate::Absent);
        assert!(consumer.session().is_none());
    }

    #[test]
    fn test_detach_stops_rendering_but_keeps_session() {
        let engine = ManualEngine::default();
        let mut manager = SessionManager::new(engine.clone());
        let mut consumer = SessionConsumer::new();
        let room = DocumentId::fresh();

        consumer.open(&mut manager, room).unwrap();
        engine.notifier(0).synced();
        manager.pump();
        consumer.refresh();
        assert!(consumer.render().is_some());

        consumer.detach();
        assert!(consumer.render().is_none());
        assert!(consumer.session().is_none());
        assert_eq!(consumer.gate(), &RenderGate::Absent);
        assert!(!consumer.refresh());

        // The manager still owns a synced session
        assert!(!engine.destroyed(0));
        assert_eq!(manager.state(), SessionState::Synced);
    }

    #[tokio::test]
    async fn test_ready_waits_for_requested_room() {
        let engine = ManualEngine::default();
        let mut manager = SessionManager::new(engine.clone());
        let mut consumer = SessionConsumer::new();
        let room = DocumentId::fresh();

        consumer.open(&mut manager, room).unwrap();
        engine.notifier(0).synced();
        let doc = consumer.ready(&mut manager).await.unwrap();
        assert_eq!(doc.room(), &room);
    }
}
