//! # quire-collab — Collaborative editing sessions for Quire
//!
//! Binds one CRDT document at a time to the active record and makes sure no
//! consumer ever edits or renders a document that belongs to another record.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐  request_session  ┌──────────────────┐
//! │ SessionConsumer │ ────────────────► │  SessionManager  │
//! │  (RenderGate)   │ ◄──── watch ───── │ (one live room)  │
//! └─────────────────┘                   └────────┬─────────┘
//!                                                │ connect / destroy
//!                                                ▼
//!                                       ┌──────────────────┐
//!                                       │   CrdtEngine     │
//!                                       │   (LocalHub)     │
//!                                       └────────┬─────────┘
//!                                                │
//!                                    ┌───────────┴───────────┐
//!                                    │ RoomSnapshots (LZ4)   │
//!                                    │ rooms partition       │
//!                                    └───────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`] — `DocumentHandle`, namespaced text regions
//! - [`engine`] — `CrdtEngine` / `Connection` seam, epoch-tagged notifications
//! - [`session`] — `SessionManager`, the single live session
//! - [`gate`] — `RenderGate` and `SessionConsumer`
//! - [`hub`] — `LocalHub`, the in-process engine
//! - [`snapshot`] — room state persistence
//! - [`mirror`] — region text ↔ record fields

pub mod document;
pub mod engine;
pub mod error;
pub mod gate;
pub mod hub;
pub mod mirror;
pub mod session;
pub mod snapshot;

pub use document::{region_name, DocumentHandle, CONTENT_FIELD, TITLE_FIELD};
pub use engine::{Connection, CrdtEngine, SessionEvent, SyncNotifier, SyncSignal};
pub use error::{Result, SessionError};
pub use gate::{RenderGate, SessionConsumer};
pub use hub::{HubConfig, HubConnection, LocalHub};
pub use mirror::{mirror_content, seed_document};
pub use session::{ListenerId, SessionHandle, SessionManager, SessionState};
pub use snapshot::RoomSnapshots;
