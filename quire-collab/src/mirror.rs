//! Keeps a record's plain-text fields in step with its collaborative regions.

use crate::document::{DocumentHandle, CONTENT_FIELD, TITLE_FIELD};
use crate::error::{Result, SessionError};
use quire_core::{DocumentRecord, DocumentStore, RecordPatch, StorageBackend};

/// Fill empty regions of a freshly synced document from `record`.
/// Regions that already hold text are left alone. Returns whether anything
/// was written; the caller flushes.
pub fn seed_document(record: &DocumentRecord, document: &DocumentHandle) -> Result<bool> {
    check_room(record, document)?;
    let mut seeded = false;
    for (field, value) in [(TITLE_FIELD, &record.title), (CONTENT_FIELD, &record.content)] {
        if !value.is_empty() && document.read_region(field)?.is_empty() {
            document.replace_region(field, value)?;
            seeded = true;
        }
    }
    Ok(seeded)
}

/// Write the document's region text back into its record. Fields whose text
/// matches the record are left out of the patch, so an unchanged document
/// costs no write. An empty title region never clears the title.
pub async fn mirror_content<B: StorageBackend>(
    store: &DocumentStore<B>,
    document: &DocumentHandle,
) -> Result<DocumentRecord> {
    let record = store.get_by_id(document.room()).await?;
    let content = document.read_region(CONTENT_FIELD)?;
    let title = document.read_region(TITLE_FIELD)?;

    let mut patch = RecordPatch::default();
    if content != record.content {
        patch.content = Some(content);
    }
    if !title.is_empty() && title != record.title {
        patch.title = Some(title);
    }
    if patch == RecordPatch::default() {
        return Ok(record);
    }
    log::debug!("Mirroring regions of room {} into record {}", document.room(), record.slug);
    Ok(store.update(&record.id, patch).await?)
}

fn check_room(record: &DocumentRecord, document: &DocumentHandle) -> Result<()> {
    if record.id != *document.room() {
        return Err(SessionError::Crdt(format!(
            "document for room {} cannot mirror record {}",
            document.room(),
            record.id
        )));
    }
    Ok(())
}
