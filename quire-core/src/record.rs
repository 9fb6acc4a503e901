//! Document records and their stored representation.

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::identity::DocumentId;

/// A document's metadata plus a plain-text mirror of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub slug: String,
    pub title: String,
    /// Plain-text mirror of the collaborative `content` region
    pub content: String,
    /// Milliseconds since epoch
    pub created_at: u64,
    /// Milliseconds since epoch, never decreases
    pub updated_at: u64,
    pub archived: bool,
}

impl DocumentRecord {
    pub(crate) fn new(id: DocumentId, slug: String, title: String, now: u64) -> Self {
        Self {
            id,
            slug,
            title,
            content: String::new(),
            created_at: now,
            updated_at: now,
            archived: false,
        }
    }

    /// Advance `updated_at` to `now`, or keep it if the clock went backwards.
    pub(crate) fn touch(&mut self, now: u64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// First `max_chars` characters of the content, single-lined.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .content
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        let flat = flat.trim();
        if flat.chars().count() <= max_chars {
            return flat.to_string();
        }
        let mut cut: String = flat.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Partial update accepted by [`DocumentStore::update`](crate::DocumentStore::update).
///
/// `id` and `slug` exist so that a caller forwarding an untyped payload gets a
/// validation error instead of a silent drop when it tries to change them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

impl RecordPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// Record as found in storage. Older writers did not store an `id`, and some
/// omitted the optional fields entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredRecord {
    #[serde(default)]
    pub id: Option<DocumentId>,
    pub slug: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub archived: bool,
}

impl StoredRecord {
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
    }

    /// Promote to a full record using `id`.
    pub fn into_record(self, id: DocumentId) -> DocumentRecord {
        let title = self.title.unwrap_or_else(|| self.slug.clone());
        DocumentRecord {
            id,
            slug: self.slug,
            title,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at.max(self.created_at),
            archived: self.archived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_uses_camel_case() {
        let rec = DocumentRecord::new(DocumentId::fresh(), "a".into(), "A".into(), 42);
        let json: serde_json::Value = serde_json::from_slice(&rec.encode().unwrap()).unwrap();
        assert_eq!(json["createdAt"], 42);
        assert_eq!(json["updatedAt"], 42);
        assert_eq!(json["archived"], false);
    }

    #[test]
    fn test_legacy_shape_decodes_without_id() {
        let stored = StoredRecord::decode(br#"{"slug":"old-list","title":"Old"}"#).unwrap();
        assert!(stored.id.is_none());
        let rec = stored.into_record(DocumentId::derive_legacy("old-list"));
        assert_eq!(rec.slug, "old-list");
        assert_eq!(rec.title, "Old");
        assert_eq!(rec.content, "");
        assert!(!rec.archived);
    }

    #[test]
    fn test_legacy_without_title_falls_back_to_slug() {
        let stored = StoredRecord::decode(br#"{"slug":"bare"}"#).unwrap();
        let rec = stored.into_record(DocumentId::fresh());
        assert_eq!(rec.title, "bare");
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut rec = DocumentRecord::new(DocumentId::fresh(), "a".into(), "A".into(), 100);
        rec.touch(50);
        assert_eq!(rec.updated_at, 100);
        rec.touch(150);
        assert_eq!(rec.updated_at, 150);
    }

    #[test]
    fn test_preview_truncates_and_flattens() {
        let mut rec = DocumentRecord::new(DocumentId::fresh(), "a".into(), "A".into(), 0);
        rec.content = "eggs\nmilk\nbread".into();
        assert_eq!(rec.preview(100), "eggs milk bread");
        assert_eq!(rec.preview(4), "eggs…");
    }

    #[test]
    fn test_patch_rejects_nothing_on_decode() {
        let patch: RecordPatch = serde_json::from_str(r#"{"title":"T","slug":"s"}"#).unwrap();
        assert_eq!(patch.title.as_deref(), Some("T"));
        assert_eq!(patch.slug.as_deref(), Some("s"));
        assert!(patch.content.is_none());
    }
}
