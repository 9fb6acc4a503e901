//! Command implementations over a record store and a room hub.
//!
//! Every command takes slugs from the user and resolves them to ids once, up
//! front; everything after that addresses records and rooms by id.

use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;

use quire_collab::{
    mirror_content, seed_document, LocalHub, SessionManager, CONTENT_FIELD, TITLE_FIELD,
};
use quire_core::{
    DocumentRecord, DocumentStore, RocksConfig, RocksPartition, RocksStorage, StorageBackend,
};

const PREVIEW_CHARS: usize = 48;

/// What an `edit` should do to the document.
#[derive(Debug, Default, Clone)]
pub struct Edit {
    pub set: Option<String>,
    pub append: Option<String>,
    pub title: Option<String>,
}

impl Edit {
    fn is_empty(&self) -> bool {
        self.set.is_none() && self.append.is_none() && self.title.is_none()
    }
}

pub struct Workspace<R: StorageBackend, S: StorageBackend> {
    store: DocumentStore<R>,
    hub: LocalHub<S>,
}

impl Workspace<RocksPartition, RocksPartition> {
    /// Open the on-disk workspace: records and rooms share one database.
    pub fn open(config: RocksConfig) -> Result<Self> {
        let path = config.path.display().to_string();
        let storage = RocksStorage::open(config)
            .with_context(|| format!("could not open data directory {path}"))?;
        Ok(Self::new(
            Arc::new(storage.records()?),
            Arc::new(storage.rooms()?),
        ))
    }
}

impl<R: StorageBackend, S: StorageBackend> Workspace<R, S> {
    pub fn new(records: Arc<R>, rooms: Arc<S>) -> Self {
        Self {
            store: DocumentStore::new(records),
            hub: LocalHub::new(rooms),
        }
    }

    /// Wait for detached record migrations so none is cut off at exit.
    pub async fn shutdown(&self) {
        self.store.flush_migrations().await;
    }

    pub async fn create(&self, slug: Option<&str>, title: Option<&str>) -> Result<DocumentRecord> {
        Ok(self.store.create(slug, title).await?)
    }

    pub async fn show(&self, slug: &str) -> Result<DocumentRecord> {
        Ok(self.store.get_by_slug(slug).await?)
    }

    pub async fn list(&self, include_archived: bool) -> Result<Vec<DocumentRecord>> {
        Ok(self.store.list(include_archived).await?)
    }

    pub async fn search(&self, query: &str, include_archived: bool) -> Result<Vec<DocumentRecord>> {
        Ok(self.store.search(query, include_archived).await?)
    }

    pub async fn rename(&self, slug: &str, new_slug: &str) -> Result<DocumentRecord> {
        let record = self.store.get_by_slug(slug).await?;
        Ok(self.store.rename(&record.id, new_slug).await?)
    }

    pub async fn archive(&self, slug: &str) -> Result<DocumentRecord> {
        let record = self.store.get_by_slug(slug).await?;
        Ok(self.store.archive(&record.id).await?)
    }

    pub async fn restore(&self, slug: &str) -> Result<DocumentRecord> {
        let record = self.store.get_by_slug(slug).await?;
        Ok(self.store.restore(&record.id).await?)
    }

    /// Hard-delete an archived record and drop its room.
    pub async fn delete(&self, slug: &str) -> Result<DocumentRecord> {
        let record = self.store.get_by_slug(slug).await?;
        self.store.delete(&record.id).await?;
        self.hub
            .purge_room(&record.id)
            .await
            .with_context(|| format!("record {slug} deleted but its room was not purged"))?;
        Ok(record)
    }

    /// Edit through a collaboration session, then mirror the result into
    /// the record.
    pub async fn edit(&self, slug: &str, edit: Edit) -> Result<DocumentRecord> {
        if edit.is_empty() {
            bail!("nothing to edit: pass --set, --append or --title");
        }
        let record = self.store.get_by_slug(slug).await?;
        if record.archived {
            bail!("{slug} is archived; restore it before editing");
        }

        let mut manager = SessionManager::new(self.hub.clone());
        let handle = manager.request_session(record.id)?;
        manager.sync(&handle).await?;

        let document = handle.document();
        seed_document(&record, document)?;
        if let Some(text) = &edit.set {
            document.replace_region(CONTENT_FIELD, text)?;
        }
        if let Some(text) = &edit.append {
            document.append_region(CONTENT_FIELD, text)?;
        }
        if let Some(title) = &edit.title {
            document.replace_region(TITLE_FIELD, title)?;
        }
        manager.flush().await?;

        let mirrored = mirror_content(&self.store, document).await?;
        manager.close();
        Ok(mirrored)
    }
}

// ─── Output ───────────────────────────────────────────────────────────────

pub fn render_record(record: &DocumentRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", record.title, record.slug);
    let _ = writeln!(out, "  id:       {}", record.id);
    let _ = writeln!(out, "  archived: {}", record.archived);
    let _ = writeln!(out, "  created:  {}", record.created_at);
    let _ = writeln!(out, "  updated:  {}", record.updated_at);
    if !record.content.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", record.content);
    }
    out
}

pub fn render_listing(records: &[DocumentRecord]) -> String {
    if records.is_empty() {
        return "no documents\n".to_string();
    }
    let width = records.iter().map(|r| r.slug.len()).max().unwrap_or(0);
    let mut out = String::new();
    for record in records {
        let marker = if record.archived { " [archived]" } else { "" };
        let _ = writeln!(
            out,
            "{:<width$}  {}{marker}  {}",
            record.slug,
            record.title,
            record.preview(PREVIEW_CHARS)
        );
    }
    out
}
