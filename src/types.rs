//! Core data model: remote objects, change tokens, change events and the
//! persisted sync position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque change-log position issued by the repository.
///
/// Tokens support equality and an "empty" sentinel only. No ordering is
/// defined: repositories are free to use non-monotonic token encodings, so
/// "newer than" comparisons on tokens are meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(String);

impl ChangeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The sentinel for "no position": never equal to any repository token.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a remote object. `Relationship` objects exist in the remote model
/// but are never mirrored; every traversal filters them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Document,
    Folder,
    Relationship,
}

impl ObjectKind {
    pub fn is_folder(&self) -> bool {
        matches!(self, ObjectKind::Folder)
    }

    pub fn is_document(&self) -> bool {
        matches!(self, ObjectKind::Document)
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, ObjectKind::Relationship)
    }
}

/// A remote object as reported by the repository at fetch time.
///
/// `parents` holds the filing parents known at fetch time: folders have at
/// most one, documents zero or more (multi-filing), the root has none.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    pub change_token: ChangeToken,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub created_by: String,
    pub modified_by: String,
    /// Content length; documents only.
    pub size: Option<u64>,
    /// Declared content type; documents only, may be absent or a vendor
    /// default that the reconciler replaces via the fallback chain.
    pub content_type: Option<String>,
    pub parents: Vec<String>,
    /// Version-series id shared by all versions of one logical document.
    pub version_series_id: Option<String>,
    /// Id of the private working copy when the document is checked out.
    pub checked_out_id: Option<String>,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    pub fn is_document(&self) -> bool {
        self.kind.is_document()
    }

    pub fn is_relationship(&self) -> bool {
        self.kind.is_relationship()
    }
}

/// Type of a change-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One entry of the repository change log.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub object_id: String,
    /// Change-log position directly after this event; committing it marks the
    /// event as applied.
    pub token: ChangeToken,
    /// Object kind hint from the event's inline properties, when the
    /// repository includes them. Used to skip untracked types without a
    /// fetch; `None` means the kind must be resolved by fetching.
    pub object_kind: Option<ObjectKind>,
}

impl ChangeEvent {
    /// Whether the event can possibly concern a mirrored object. Relationship
    /// changes are skipped without side effects (but still advance the
    /// ordered progress).
    pub fn is_syncable(&self) -> bool {
        !matches!(self.object_kind, Some(ObjectKind::Relationship))
    }
}

/// Persisted synchronization position: the committed change-log token plus
/// the wall-clock start of the pass that committed it.
///
/// Updated only atomically with the last checkpoint of the mutations it
/// covers - never ahead of applied state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPosition {
    pub token: ChangeToken,
    pub change_id: DateTime<Utc>,
}
