//! Identity and validation helpers shared by the record store and the
//! collaboration layer.
//!
//! Two addressing schemes coexist:
//!
//! ```text
//! slug  "milk-list"  ── mutable, human-chosen, unique across all records
//!   │
//!   └─ resolved by scan ──► id  3f2c…  ── immutable, storage key, room key
//! ```
//!
//! Everything durable (record key, CRDT room, snapshot key) is addressed by
//! id. Slugs are only ever resolved, never stored as a key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

use crate::error::RecordError;

/// Namespace for ids derived from legacy slugs.
///
/// Changing this value re-keys every migrated record, so it is fixed forever.
const LEGACY_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1e, 0x0c, 0x4a, 0x92, 0x3d, 0x4f, 0x5e, 0xa1, 0x07, 0x58, 0xc2, 0xd9, 0x3e, 0x41, 0x0f,
]);

/// Stable document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Fresh random id (UUID v4).
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for a legacy record that was stored without one.
    ///
    /// Derived from the slug (UUID v5) so that every reader of the same legacy
    /// record arrives at the same id, no matter how many migrate it at once.
    pub fn derive_legacy(slug: &str) -> Self {
        Self(Uuid::new_v5(&LEGACY_ID_NAMESPACE, slug.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Storage key of the record (and CRDT room name).
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| RecordError::Validation(format!("not a document id: {s:?}")))
    }
}

/// Check a slug: non-empty, ASCII letters, digits, `.`, `-` and `_` only.
pub fn validate_slug(slug: &str) -> Result<(), RecordError> {
    if slug.is_empty() {
        return Err(RecordError::Validation("slug must not be empty".into()));
    }
    if let Some(bad) = slug
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(RecordError::Validation(format!(
            "slug {slug:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Random slug candidate: `<prefix>-<8 hex chars>`.
///
/// Uniqueness is the caller's job; the store retries on collision.
pub fn random_slug(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &simple[..8])
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
