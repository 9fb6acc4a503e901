//! In-process sync hub with room-based document routing.
//!
//! Architecture:
//! ```text
//! Session A ──┐
//!              ├── HubRoom (doc id) ── yrs Doc ── broadcast::Sender
//! Session B ──┘        │
//!                      └── RoomSnapshots (rooms partition, LZ4)
//! ```
//!
//! Each room keeps the authoritative replica. A connection runs a two-step
//! state-vector handshake against it (hub → local, then local → hub), reports
//! `Synced`, and from then on applies whatever other sessions flush into the
//! room. Flushing merges the local diff into the room, fans it out, and
//! persists a snapshot.
//!
//! A room stays open while connections reference it. When the last one
//! stops, the room is written out if it has unsaved changes and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

use crate::document::{region_name, DocumentHandle};
use crate::engine::{Connection, CrdtEngine, SyncNotifier};
use crate::error::{Result, SessionError};
use crate::snapshot::RoomSnapshots;
use quire_core::{DocumentId, StorageBackend};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Updates buffered per connection before it lags and resyncs
    pub broadcast_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

impl HubConfig {
    /// Tiny buffer, so lag handling is easy to reach.
    pub fn for_testing() -> Self {
        Self {
            broadcast_capacity: 4,
        }
    }
}

/// Authoritative replica of one room.
struct HubRoom {
    room: DocumentId,
    doc: Mutex<Doc>,
    updates: broadcast::Sender<Arc<Vec<u8>>>,
    /// Set once the room is purged.
    closed: watch::Sender<bool>,
    /// Orders snapshot writes so an older state never lands last.
    persist: tokio::sync::Mutex<()>,
    /// Merged changes not yet in a snapshot.
    dirty: AtomicBool,
}

impl HubRoom {
    fn new(room: DocumentId, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            room,
            doc: Mutex::new(Doc::new()),
            updates,
            closed,
            persist: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Doc>> {
        self.doc
            .lock()
            .map_err(|_| SessionError::Crdt(format!("room {} lock poisoned", self.room)))
    }

    fn state_vector(&self) -> Result<Vec<u8>> {
        let doc = self.lock()?;
        let txn = doc.transact();
        Ok(txn.state_vector().encode_v1())
    }

    fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| SessionError::Crdt(e.to_string()))?;
        let doc = self.lock()?;
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    fn full_state(&self) -> Result<Vec<u8>> {
        let doc = self.lock()?;
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn read_region(&self, field: &str) -> Result<String> {
        let doc = self.lock()?;
        let text = doc.get_or_insert_text(region_name(&self.room, field));
        let txn = doc.transact();
        Ok(text.get_string(&txn))
    }

    /// Apply `update` to the replica without fanning it out.
    fn apply(&self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| SessionError::Crdt(e.to_string()))?;
        let doc = self.lock()?;
        let mut txn = doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SessionError::Crdt(e.to_string()))
    }

    /// Apply `update` and fan it out to every connection in the room.
    /// Returns the number of receivers.
    fn merge(&self, update: &[u8]) -> Result<usize> {
        self.apply(update)?;
        self.dirty.store(true, Ordering::Release);
        Ok(self.updates.send(Arc::new(update.to_vec())).unwrap_or(0))
    }
}

struct HubInner<B: StorageBackend> {
    rooms: RwLock<HashMap<DocumentId, Arc<HubRoom>>>,
    /// Live connections per room, counted from connect until stop.
    connections: Mutex<HashMap<DocumentId, usize>>,
    snapshots: RoomSnapshots<B>,
    config: HubConfig,
}

impl<B: StorageBackend> HubInner<B> {
    fn counts(&self) -> MutexGuard<'_, HashMap<DocumentId, usize>> {
        // The map holds plain counters; a panic elsewhere cannot leave it torn.
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn acquire(&self, room: &DocumentId) {
        *self.counts().entry(*room).or_insert(0) += 1;
    }

    /// Returns true when `room` has no connections left.
    fn release(&self, room: &DocumentId) -> bool {
        let mut connections = self.counts();
        let remaining = match connections.get_mut(room) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            connections.remove(room);
        }
        remaining == 0
    }

    fn is_idle(&self, room: &DocumentId) -> bool {
        !self.counts().contains_key(room)
    }

    /// A replica of `room` loaded from its snapshot, not registered.
    async fn load_room(&self, room: &DocumentId) -> Result<HubRoom> {
        let hub_room = HubRoom::new(*room, self.config.broadcast_capacity);
        match self.snapshots.load(room).await? {
            Some(state) => {
                hub_room.apply(&state)?;
                log::debug!("Loaded room {room} from snapshot ({} bytes)", state.len());
            }
            None => log::debug!("No snapshot for room {room}"),
        }
        Ok(hub_room)
    }

    /// Get or load a room.
    async fn open_room(&self, room: &DocumentId) -> Result<Arc<HubRoom>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(open) = rooms.get(room) {
                return Ok(open.clone());
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(open) = rooms.get(room) {
            return Ok(open.clone());
        }

        let hub_room = Arc::new(self.load_room(room).await?);
        rooms.insert(*room, hub_room.clone());
        log::info!("Opened room {room}");
        Ok(hub_room)
    }

    /// Drop `room` if nothing connected to it meanwhile, writing out
    /// changes no snapshot holds yet.
    async fn close_idle(&self, room: DocumentId) {
        let mut rooms = self.rooms.write().await;
        if !self.is_idle(&room) {
            return;
        }
        let Some(open) = rooms.get(&room).cloned() else {
            return;
        };
        let _order = open.persist.lock().await;
        if open.dirty.swap(false, Ordering::AcqRel) && !open.is_closed() {
            let saved = async {
                let state = open.full_state()?;
                self.snapshots.save(&room, &state).await
            }
            .await;
            if let Err(e) = saved {
                open.dirty.store(true, Ordering::Release);
                log::warn!("Keeping room {room} open, final snapshot failed: {e}");
                return;
            }
        }
        rooms.remove(&room);
        log::info!("Closed idle room {room}");
    }

    async fn persist(&self, room: &HubRoom) -> Result<()> {
        let _order = room.persist.lock().await;
        if room.is_closed() {
            return Err(SessionError::Transport(format!("room {} was closed", room.room)));
        }
        room.dirty.store(false, Ordering::Release);
        let state = room.full_state()?;
        let written = match self.snapshots.save(&room.room, &state).await {
            Ok(written) => written,
            Err(e) => {
                room.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        };
        log::debug!("Persisted room {} ({} → {} bytes)", room.room, state.len(), written);
        Ok(())
    }
}

/// Shared in-process engine. Clones refer to the same set of rooms, so
/// several session managers built from clones of one hub collaborate.
pub struct LocalHub<B: StorageBackend> {
    inner: Arc<HubInner<B>>,
}

impl<B: StorageBackend> Clone for LocalHub<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: StorageBackend> LocalHub<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, HubConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: RwLock::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                snapshots: RoomSnapshots::new(backend),
                config,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Current text of `field` in the authoritative replica. A room that
    /// is not open is read from its snapshot and stays closed.
    pub async fn read_region(&self, room: &DocumentId, field: &str) -> Result<String> {
        let open = self.inner.rooms.read().await.get(room).cloned();
        match open {
            Some(open) => open.read_region(field),
            None => self.inner.load_room(room).await?.read_region(field),
        }
    }

    /// Rooms currently held in memory.
    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    /// Drop a room and its snapshot. Connections still bound to it fail.
    pub async fn purge_room(&self, room: &DocumentId) -> Result<()> {
        let removed = self.inner.rooms.write().await.remove(room);
        match removed {
            Some(open) => {
                // Under the persist lock so an in-flight flush cannot
                // write the snapshot back.
                let _order = open.persist.lock().await;
                open.closed.send_replace(true);
                self.inner.snapshots.purge(room).await
            }
            None => self.inner.snapshots.purge(room).await,
        }
    }
}

impl<B: StorageBackend> CrdtEngine for LocalHub<B> {
    type Connection = HubConnection<B>;

    fn connect(
        &self,
        room: &DocumentId,
        document: &DocumentHandle,
        notifier: SyncNotifier,
    ) -> Result<HubConnection<B>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Transport(format!("no async runtime: {e}")))?;

        let synced = Arc::new(AtomicBool::new(false));
        let remote = Arc::new(OnceLock::new());
        self.inner.acquire(room);
        let task = runtime.spawn(run_connection(
            self.inner.clone(),
            document.clone(),
            notifier,
            remote.clone(),
            synced.clone(),
        ));

        log::debug!("Connecting to room {room}");
        Ok(HubConnection {
            room: *room,
            document: document.clone(),
            hub: self.inner.clone(),
            remote,
            synced,
            task: Some(task),
        })
    }
}

/// Connection task: handshake, then follow the room until aborted.
async fn run_connection<B: StorageBackend>(
    hub: Arc<HubInner<B>>,
    document: DocumentHandle,
    notifier: SyncNotifier,
    remote: Arc<OnceLock<Arc<HubRoom>>>,
    synced: Arc<AtomicBool>,
) {
    let room = *notifier.room();
    let hub_room = match hub.open_room(&room).await {
        Ok(open) => open,
        Err(e) => {
            notifier.failed(e.to_string());
            return;
        }
    };
    // Subscribe before the handshake so nothing flushed meanwhile is missed.
    let mut updates = hub_room.updates.subscribe();
    let mut closed = hub_room.closed.subscribe();
    if hub_room.is_closed() {
        notifier.failed(format!("room {room} was closed"));
        return;
    }

    if let Err(e) = handshake(&hub, &hub_room, &document).await {
        if !document.is_destroyed() {
            notifier.failed(e.to_string());
        }
        return;
    }
    let _ = remote.set(hub_room.clone());
    synced.store(true, Ordering::Release);
    notifier.synced();

    loop {
        let received = tokio::select! {
            _ = closed.changed() => Err(broadcast::error::RecvError::Closed),
            received = updates.recv() => received,
        };
        let outcome = match received {
            Ok(update) => document.apply_update(&update),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Connection to room {room} lagged by {skipped} update(s), resyncing");
                document
                    .state_vector()
                    .and_then(|sv| hub_room.encode_diff(&sv))
                    .and_then(|diff| document.apply_update(&diff))
            }
            Err(broadcast::error::RecvError::Closed) => {
                synced.store(false, Ordering::Release);
                notifier.failed(format!("room {room} was closed"));
                return;
            }
        };
        match outcome {
            Ok(()) => {}
            Err(SessionError::Destroyed(_)) => return,
            Err(e) => {
                synced.store(false, Ordering::Release);
                notifier.failed(e.to_string());
                return;
            }
        }
    }
}

async fn handshake<B: StorageBackend>(
    hub: &HubInner<B>,
    hub_room: &HubRoom,
    document: &DocumentHandle,
) -> Result<()> {
    // Step 1: pull what the room has that we lack
    let missing = hub_room.encode_diff(&document.state_vector()?)?;
    document.apply_update(&missing)?;

    // Step 2: push what we have that the room lacks
    let local = document.encode_diff(&hub_room.state_vector()?)?;
    hub_room.merge(&local)?;
    hub.persist(hub_room).await
}

/// A document bound to a hub room.
pub struct HubConnection<B: StorageBackend> {
    room: DocumentId,
    document: DocumentHandle,
    hub: Arc<HubInner<B>>,
    remote: Arc<OnceLock<Arc<HubRoom>>>,
    synced: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<B: StorageBackend> HubConnection<B> {
    pub fn room(&self) -> &DocumentId {
        &self.room
    }

    fn stop(&mut self) {
        self.synced.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Disconnected from room {}", self.room);
            if self.hub.release(&self.room) {
                // Without a runtime the room just stays open.
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let hub = self.hub.clone();
                    let room = self.room;
                    runtime.spawn(async move { hub.close_idle(room).await });
                }
            }
        }
    }
}

impl<B: StorageBackend> Connection for HubConnection<B> {
    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire) && self.task.is_some()
    }

    async fn flush(&self) -> Result<()> {
        let remote = self
            .remote
            .get()
            .filter(|_| self.is_synced())
            .ok_or_else(|| SessionError::Transport(format!("room {} is not synced", self.room)))?;
        let diff = self.document.encode_diff(&remote.state_vector()?)?;
        let receivers = remote.merge(&diff)?;
        log::trace!("Flushed {} bytes to room {} ({receivers} receiver(s))", diff.len(), self.room);
        self.hub.persist(remote).await
    }

    fn destroy(&mut self) {
        self.stop();
    }
}

impl<B: StorageBackend> Drop for HubConnection<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
