//! Document record store.
//!
//! Records are keyed by their stable id; slugs are resolved by scanning.
//!
//! ```text
//! rename("a" → "c")
//!
//!   key 3f2c…  {id: 3f2c…, slug: "a", …}      put under the SAME key
//!        │                                    ─────────────────────────►
//!   key 3f2c…  {id: 3f2c…, slug: "c", …}      room 3f2c… untouched
//! ```
//!
//! Because the key never changes, renames need no delete+recreate and the
//! paired collaboration room (also keyed by id) is never migrated.
//!
//! ## Legacy records
//!
//! Values written before ids existed carry no `id`. Any read that meets one
//! assigns [`DocumentId::derive_legacy`] and returns immediately; the
//! re-keying write runs detached. Writes to that id wait for the detached
//! write first, so a migration can never land on top of a newer caller write.
//! That holds for writers going through the same store. A second store over
//! the same backend can still write between the migration's existence check
//! and its put; the backend offers no compare-and-swap to close that window.
//!
//! Writes are serialized per store: the uniqueness check on a slug and the
//! write that claims it happen under one guard.
//!
//! Slug lookups scan every record. That is fine for the small per-user record
//! counts this store serves; it is not an index.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{RecordError, Result};
use crate::identity::{now_millis, random_slug, validate_slug, DocumentId};
use crate::record::{DocumentRecord, RecordPatch, StoredRecord};
use crate::storage::StorageBackend;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix for generated slugs (default: "doc")
    pub random_slug_prefix: String,
    /// Generated-slug collisions tolerated before giving up (default: 16)
    pub random_slug_attempts: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            random_slug_prefix: "doc".to_string(),
            random_slug_attempts: 16,
        }
    }
}

/// A record found during a scan, with the key it was stored under.
struct Scanned {
    key: String,
    record: DocumentRecord,
    legacy: bool,
}

/// CRUD and lifecycle operations over document records.
pub struct DocumentStore<B: StorageBackend> {
    backend: Arc<B>,
    config: StoreConfig,
    /// Detached migration writes by id. A `None` entry means the migration
    /// was already scheduled and has been waited for.
    migrations: Mutex<HashMap<DocumentId, Option<JoinHandle<()>>>>,
    /// Held from the read that validates a write until the write lands.
    writes: Mutex<()>,
}

impl<B: StorageBackend> DocumentStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            migrations: Mutex::new(HashMap::new()),
            writes: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    // ─── Operations ───────────────────────────────────────────────────

    /// Create a record. A missing slug is generated; a missing title
    /// defaults to the slug.
    pub async fn create(&self, slug: Option<&str>, title: Option<&str>) -> Result<DocumentRecord> {
        let _write = self.writes.lock().await;
        let existing = self.scan().await?;

        let slug = match slug {
            Some(slug) => {
                validate_slug(slug)?;
                if existing.iter().any(|s| s.record.slug == slug) {
                    return Err(RecordError::Conflict(slug.to_string()));
                }
                slug.to_string()
            }
            None => self.generate_slug(&existing)?,
        };

        let mut id = DocumentId::fresh();
        while existing.iter().any(|s| s.record.id == id) || self.backend.get(&id.key()).await?.is_some() {
            id = DocumentId::fresh();
        }

        let title = title.map(str::to_string).unwrap_or_else(|| slug.clone());
        let record = DocumentRecord::new(id, slug, title, now_millis());
        self.persist(&record).await?;

        log::info!("Created document {} ({})", record.slug, record.id);
        Ok(record)
    }

    /// First record whose slug matches exactly.
    pub async fn get_by_slug(&self, slug: &str) -> Result<DocumentRecord> {
        self.scan()
            .await?
            .into_iter()
            .find(|s| s.record.slug == slug)
            .map(|s| s.record)
            .ok_or_else(|| RecordError::slug_not_found(slug))
    }

    /// Keyed lookup, falling back to not-yet-migrated legacy records.
    pub async fn get_by_id(&self, id: &DocumentId) -> Result<DocumentRecord> {
        if let Some(bytes) = self.backend.get(&id.key()).await? {
            let stored = StoredRecord::decode(&bytes)?;
            // An id-less value under this key is a legacy entry; its id
            // comes from its slug, which only the scan assigns.
            if stored.id == Some(*id) {
                return Ok(stored.into_record(*id));
            }
        }

        self.scan()
            .await?
            .into_iter()
            .find(|s| s.record.id == *id)
            .map(|s| s.record)
            .ok_or_else(|| RecordError::id_not_found(id))
    }

    /// Merge title and/or content. Touching id or slug is rejected.
    pub async fn update(&self, id: &DocumentId, patch: RecordPatch) -> Result<DocumentRecord> {
        let _write = self.writes.lock().await;
        let mut record = self.get_by_id(id).await?;

        if patch.id.is_some_and(|patched| patched != record.id) {
            return Err(RecordError::Validation("id cannot be changed".into()));
        }
        if patch.slug.as_ref().is_some_and(|patched| *patched != record.slug) {
            return Err(RecordError::Validation(
                "slug cannot be changed by update, use rename".into(),
            ));
        }
        if patch.title.is_none() && patch.content.is_none() {
            return Ok(record);
        }

        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(content) = patch.content {
            record.content = content;
        }
        record.touch(now_millis());
        self.persist(&record).await?;

        log::debug!("Updated document {} ({})", record.slug, record.id);
        Ok(record)
    }

    /// Change the slug in place under the same id key.
    pub async fn rename(&self, id: &DocumentId, new_slug: &str) -> Result<DocumentRecord> {
        validate_slug(new_slug)?;

        let _write = self.writes.lock().await;
        let all = self.scan().await?;
        let mut record = all
            .iter()
            .find(|s| s.record.id == *id)
            .map(|s| s.record.clone())
            .ok_or_else(|| RecordError::id_not_found(id))?;

        if record.slug == new_slug {
            return Ok(record);
        }
        if all.iter().any(|s| s.record.id != *id && s.record.slug == new_slug) {
            return Err(RecordError::Conflict(new_slug.to_string()));
        }

        let old_slug = std::mem::replace(&mut record.slug, new_slug.to_string());
        record.touch(now_millis());
        self.persist(&record).await?;

        log::info!("Renamed document {old_slug} → {new_slug} ({id})");
        Ok(record)
    }

    pub async fn archive(&self, id: &DocumentId) -> Result<DocumentRecord> {
        self.set_archived(id, true).await
    }

    pub async fn restore(&self, id: &DocumentId) -> Result<DocumentRecord> {
        self.set_archived(id, false).await
    }

    /// Hard delete. Only archived records can be deleted.
    pub async fn delete(&self, id: &DocumentId) -> Result<()> {
        let _write = self.writes.lock().await;
        let record = self.get_by_id(id).await?;
        if !record.archived {
            return Err(RecordError::PreconditionFailed(format!(
                "document {} must be archived before it can be deleted",
                record.slug
            )));
        }

        self.settle_migration(id).await;
        self.backend.delete(&id.key()).await?;

        log::info!("Deleted document {} ({id})", record.slug);
        Ok(())
    }

    /// Records sorted by `updated_at`, newest first.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<DocumentRecord>> {
        let mut records: Vec<DocumentRecord> = self
            .scan()
            .await?
            .into_iter()
            .map(|s| s.record)
            .filter(|r| include_archived || !r.archived)
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Case-insensitive substring match over title and content.
    pub async fn search(&self, query: &str, include_archived: bool) -> Result<Vec<DocumentRecord>> {
        let needle = query.trim().to_lowercase();
        let mut records = self.list(include_archived).await?;
        if !needle.is_empty() {
            records.retain(|r| {
                r.title.to_lowercase().contains(&needle) || r.content.to_lowercase().contains(&needle)
            });
        }
        Ok(records)
    }

    /// Wait for every detached migration write scheduled so far.
    pub async fn flush_migrations(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.migrations.lock().await;
            pending.values_mut().filter_map(Option::take).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ─── Internals ────────────────────────────────────────────────────

    async fn set_archived(&self, id: &DocumentId, archived: bool) -> Result<DocumentRecord> {
        let _write = self.writes.lock().await;
        let mut record = self.get_by_id(id).await?;
        if record.archived == archived {
            return Ok(record);
        }

        record.archived = archived;
        record.touch(now_millis());
        self.persist(&record).await?;

        log::info!(
            "{} document {} ({id})",
            if archived { "Archived" } else { "Restored" },
            record.slug
        );
        Ok(record)
    }

    fn generate_slug(&self, existing: &[Scanned]) -> Result<String> {
        for _ in 0..self.config.random_slug_attempts.max(1) {
            let candidate = random_slug(&self.config.random_slug_prefix);
            if !existing.iter().any(|s| s.record.slug == candidate) {
                return Ok(candidate);
            }
        }
        Err(RecordError::Conflict(format!(
            "no free slug with prefix {:?}",
            self.config.random_slug_prefix
        )))
    }

    async fn persist(&self, record: &DocumentRecord) -> Result<()> {
        self.settle_migration(&record.id).await;
        self.backend.put(&record.id.key(), record.encode()?).await?;
        Ok(())
    }

    /// Wait for a detached migration of `id`, if one is still running.
    async fn settle_migration(&self, id: &DocumentId) {
        let handle = {
            let mut pending = self.migrations.lock().await;
            pending.get_mut(id).and_then(Option::take)
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Read every record, assigning ids to legacy entries.
    ///
    /// An id-keyed entry wins over a legacy entry with the same derived id;
    /// the legacy entry is then only scheduled for cleanup.
    async fn scan(&self) -> Result<Vec<Scanned>> {
        let mut by_id: HashMap<DocumentId, Scanned> = HashMap::new();

        for (key, bytes) in self.backend.list().await? {
            let stored = match StoredRecord::decode(&bytes) {
                Ok(stored) => stored,
                Err(e) => {
                    log::warn!("Skipping undecodable record at key {key}: {e}");
                    continue;
                }
            };
            let legacy = stored.id.is_none();
            let id = stored
                .id
                .unwrap_or_else(|| DocumentId::derive_legacy(&stored.slug));
            let scanned = Scanned {
                key,
                record: stored.into_record(id),
                legacy,
            };

            match by_id.get(&id) {
                Some(kept) if !kept.legacy => {
                    if scanned.legacy {
                        self.schedule_migration(scanned.key, None).await;
                    }
                }
                Some(kept) => {
                    if !scanned.legacy {
                        let stale = kept.key.clone();
                        by_id.insert(id, scanned);
                        self.schedule_migration(stale, None).await;
                    }
                }
                None => {
                    by_id.insert(id, scanned);
                }
            }
        }

        for scanned in by_id.values().filter(|s| s.legacy) {
            self.schedule_migration(scanned.key.clone(), Some(scanned.record.clone()))
                .await;
        }

        Ok(by_id.into_values().collect())
    }

    /// Detach the write that re-keys a legacy entry under its id.
    ///
    /// With `record == None` the id-keyed copy already exists and only the
    /// legacy key is removed. Each id is migrated at most once per store; the
    /// task also refuses to overwrite an id key some other writer created.
    async fn schedule_migration(&self, legacy_key: String, record: Option<DocumentRecord>) {
        let id = match &record {
            Some(record) => record.id,
            None => match self.backend.get(&legacy_key).await {
                Ok(Some(bytes)) => match StoredRecord::decode(&bytes) {
                    Ok(stored) => DocumentId::derive_legacy(&stored.slug),
                    Err(_) => return,
                },
                _ => return,
            },
        };

        let mut pending = self.migrations.lock().await;
        if pending.contains_key(&id) {
            return;
        }

        let backend = self.backend.clone();
        let handle = tokio::spawn(async move {
            let key = id.key();
            if let Some(record) = record {
                let encoded = match record.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::warn!("Migration of {legacy_key} failed: {e}");
                        return;
                    }
                };
                match backend.get(&key).await {
                    Ok(None) => {
                        if let Err(e) = backend.put(&key, encoded).await {
                            log::warn!("Migration of {legacy_key} → {id} failed: {e}");
                            return;
                        }
                    }
                    Ok(Some(_)) => {}
                    Err(e) => {
                        log::warn!("Migration of {legacy_key} → {id} failed: {e}");
                        return;
                    }
                }
            }
            if legacy_key != key {
                if let Err(e) = backend.delete(&legacy_key).await {
                    log::warn!("Could not remove legacy key {legacy_key}: {e}");
                    return;
                }
            }
            log::info!("Migrated legacy record {legacy_key} → {id}");
        });
        pending.insert(id, Some(handle));
    }
}

fn sort_newest_first(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });
}
