//! Session integration tests against the in-process hub.
//!
//! Verifies:
//! - a session superseded before it syncs never reaches Synced
//! - stale notifications from a torn-down epoch are dropped
//! - two managers on one hub converge on the same room
//! - rooms are keyed by id, so a rename does not move the session
//! - room state survives a RocksDB reopen
//! - region text mirrors into the record

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quire_collab::{
    mirror_content, seed_document, LocalHub, RenderGate, SessionConsumer, SessionEvent,
    SessionManager, SessionState, SyncSignal, CONTENT_FIELD, TITLE_FIELD,
};
use quire_core::{DocumentId, DocumentStore, MemoryBackend, RecordPatch, RocksConfig, RocksStorage};
use tempfile::tempdir;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn memory_hub() -> LocalHub<MemoryBackend> {
    LocalHub::new(Arc::new(MemoryBackend::new()))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

// ─── Switching ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_superseded_session_never_syncs() {
    let hub = memory_hub();
    let mut manager = SessionManager::new(hub);
    let doc_a = DocumentId::fresh();
    let doc_b = DocumentId::fresh();

    let a = manager.request_session(doc_a).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    manager
        .on_synced(&a, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // Switch before A's connection task has had a chance to run.
    let b = manager.request_session(doc_b).unwrap();
    manager.sync(&b).await.unwrap();
    settle().await;
    manager.pump();

    assert_eq!(a.state(), SessionState::Absent);
    assert!(!a.is_synced_now());
    assert!(a.document().is_destroyed());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(manager.current_room(), Some(doc_b));
    assert_eq!(manager.state(), SessionState::Synced);
}

#[tokio::test]
async fn test_rapid_switch_back_gets_fresh_session() {
    let hub = memory_hub();
    let mut manager = SessionManager::new(hub);
    let doc_a = DocumentId::fresh();
    let doc_b = DocumentId::fresh();

    let first = manager.request_session(doc_a).unwrap();
    manager.request_session(doc_b).unwrap();
    let again = manager.request_session(doc_a).unwrap();

    assert!(!first.document().same_instance(again.document()));
    assert!(again.epoch() > first.epoch());
    manager.sync(&again).await.unwrap();
    assert!(first.wait_synced().await.is_err());
}

#[tokio::test]
async fn test_stale_epoch_dropped() {
    let hub = memory_hub();
    let mut manager = SessionManager::new(hub);
    let room = DocumentId::fresh();

    let old = manager.request_session(room).unwrap();
    manager.close();
    let live = manager.request_session(room).unwrap();

    let stale = SessionEvent {
        room,
        epoch: old.epoch(),
        signal: SyncSignal::Failed("old connection".into()),
    };
    assert!(!manager.dispatch(stale));
    manager.sync(&live).await.unwrap();
    assert_eq!(manager.state(), SessionState::Synced);
}

#[tokio::test]
async fn test_consumer_gate_follows_latest_request() {
    let hub = memory_hub();
    let mut manager = SessionManager::new(hub);
    let mut consumer = SessionConsumer::new();
    let doc_a = DocumentId::fresh();
    let doc_b = DocumentId::fresh();

    consumer.open(&mut manager, doc_a).unwrap();
    consumer.ready(&mut manager).await.unwrap();
    assert_eq!(consumer.gate(), &RenderGate::Synced(doc_a));

    consumer.open(&mut manager, doc_b).unwrap();
    assert!(consumer.render().is_none());
    let rendered = consumer.ready(&mut manager).await.unwrap();
    assert_eq!(rendered.room(), &doc_b);
}

// ─── Collaboration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_managers_converge() {
    let hub = memory_hub();
    let room = DocumentId::fresh();
    let mut alice = SessionManager::new(hub.clone());
    let mut bob = SessionManager::new(hub.clone());

    let a = alice.request_session(room).unwrap();
    alice.sync(&a).await.unwrap();
    let b = bob.request_session(room).unwrap();
    bob.sync(&b).await.unwrap();

    a.document().replace_region(CONTENT_FIELD, "milk").unwrap();
    alice.flush().await.unwrap();
    settle().await;
    b.document().append_region(CONTENT_FIELD, ", eggs").unwrap();
    bob.flush().await.unwrap();
    settle().await;

    assert_eq!(a.document().read_region(CONTENT_FIELD).unwrap(), "milk, eggs");
    assert_eq!(b.document().read_region(CONTENT_FIELD).unwrap(), "milk, eggs");
    assert_eq!(hub.read_region(&room, CONTENT_FIELD).await.unwrap(), "milk, eggs");
}

#[tokio::test]
async fn test_rename_keeps_room() {
    let backend = Arc::new(MemoryBackend::new());
    let store = DocumentStore::new(backend.clone());
    let hub = memory_hub();
    let mut manager = SessionManager::new(hub);

    let record = store.create(Some("draft"), None).await.unwrap();
    let handle = manager.request_session(record.id).unwrap();
    manager.sync(&handle).await.unwrap();

    let renamed = store.rename(&record.id, "final").await.unwrap();
    let again = manager.request_session(renamed.id).unwrap();
    assert!(again.document().same_instance(handle.document()));
    assert_eq!(manager.state(), SessionState::Synced);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_room_survives_rocksdb_reopen() {
    let dir = tempdir().unwrap();
    let room = DocumentId::fresh();
    {
        let storage = RocksStorage::open(RocksConfig::for_testing(dir.path())).unwrap();
        let hub = LocalHub::new(Arc::new(storage.rooms().unwrap()));
        let mut manager = SessionManager::new(hub);
        let handle = manager.request_session(room).unwrap();
        manager.sync(&handle).await.unwrap();
        handle.document().replace_region(TITLE_FIELD, "Groceries").unwrap();
        handle.document().replace_region(CONTENT_FIELD, "milk").unwrap();
        manager.flush().await.unwrap();
        manager.close();
        drop(manager);
        // Let the aborted connection task release its handle on the DB.
        settle().await;
    }

    let storage = RocksStorage::open(RocksConfig::for_testing(dir.path())).unwrap();
    let hub = LocalHub::new(Arc::new(storage.rooms().unwrap()));
    let mut manager = SessionManager::new(hub);
    let handle = manager.request_session(room).unwrap();
    manager.sync(&handle).await.unwrap();
    assert_eq!(handle.document().read_region(TITLE_FIELD).unwrap(), "Groceries");
    assert_eq!(handle.document().read_region(CONTENT_FIELD).unwrap(), "milk");
}

#[tokio::test]
async fn test_edit_session_mirrors_into_record() {
    let dir = tempdir().unwrap();
    let storage = RocksStorage::open(RocksConfig::for_testing(dir.path())).unwrap();
    let store = DocumentStore::new(Arc::new(storage.records().unwrap()));
    let hub = LocalHub::new(Arc::new(storage.rooms().unwrap()));

    let record = store.create(Some("todo"), Some("Todo")).await.unwrap();
    let record = store
        .update(&record.id, RecordPatch::content("buy milk"))
        .await
        .unwrap();

    let mut manager = SessionManager::new(hub);
    let handle = manager.request_session(record.id).unwrap();
    manager.sync(&handle).await.unwrap();
    assert!(seed_document(&record, handle.document()).unwrap());
    handle.document().append_region(CONTENT_FIELD, "\nbuy eggs").unwrap();
    manager.flush().await.unwrap();

    let mirrored = mirror_content(&store, handle.document()).await.unwrap();
    assert_eq!(mirrored.content, "buy milk\nbuy eggs");
    assert_eq!(mirrored.slug, "todo");
    assert!(mirrored.updated_at >= record.updated_at);

    let found = store.search("eggs", false).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, record.id);
}
