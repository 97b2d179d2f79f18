//! Remote repository interface.
//!
//! The engine consumes the remote side through this trait only; transport,
//! authentication and wire format live behind it. Implementations must map
//! their protocol errors onto the [`SyncError`] taxonomy: a vanished object
//! is `NotFound` (the engine treats it as a deletion signal), a duplicate
//! name on create is `Conflict`, everything transport-shaped is `Transport`.
//!
//! [`SyncError`]: crate::error::SyncError

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChangeEvent, ChangeToken, RemoteObject};

/// Static facts about the repository, read once per pass.
#[derive(Debug, Clone)]
pub struct RepositoryInfo {
    pub name: String,
    pub vendor: String,
    pub product: String,
    /// Whether the repository maintains a replayable change log. Without it
    /// every sync pass is a full traversal.
    pub change_log_supported: bool,
    /// Whether the repository profile exposes trash/untrash operations.
    pub trash_supported: bool,
}

/// Typed access to the remote tree-structured repository.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn repository_info(&self) -> Result<RepositoryInfo>;

    /// Change-log position at the time of the call.
    async fn current_token(&self) -> Result<ChangeToken>;

    async fn root(&self) -> Result<RemoteObject>;

    /// Children of a folder. Multi-filed documents are reported under each of
    /// their filing parents.
    async fn children(&self, folder_id: &str) -> Result<Vec<RemoteObject>>;

    /// Change events strictly after `token` (all events when `token` is
    /// empty), in repository order. Each event carries the token marking the
    /// position directly after it.
    async fn changes_since(&self, token: &ChangeToken) -> Result<Vec<ChangeEvent>>;

    /// Fetch one object by id. Fails with `NotFound` when the object is gone
    /// or trashed on the vendor side.
    async fn object(&self, id: &str) -> Result<RemoteObject>;

    /// Current filing parents of an object. Empty for the root and for
    /// unfiled (orphaned) documents.
    async fn parents(&self, id: &str) -> Result<Vec<RemoteObject>>;

    /// All historical versions of a document, latest first.
    async fn versions(&self, id: &str) -> Result<Vec<RemoteObject>>;

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<RemoteObject>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteObject>;

    /// Rename and/or re-file an object. Returns `None` when the remote side
    /// considers nothing changed.
    async fn update(
        &self,
        id: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<RemoteObject>>;

    /// Replace a document's content stream.
    async fn update_content(
        &self,
        id: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<RemoteObject>;

    async fn copy(&self, id: &str, dest_parent_id: &str, name: &str) -> Result<RemoteObject>;

    /// Delete a document or a folder subtree.
    async fn delete(&self, id: &str) -> Result<()>;

    /// The "no position" sentinel for this repository.
    fn empty_token(&self) -> ChangeToken {
        ChangeToken::empty()
    }
}
