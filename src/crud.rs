//! Local-edit push adapter.
//!
//! The write half of the engine: every local change is pushed to the
//! repository first and the returned state is folded back into the mirror
//! through the reconciliation primitive, so the mirror only ever reflects
//! what the remote side acknowledged. A push that fails with a transport
//! or consistency error raises the engine's repair flag and the next
//! `sync()` pass runs a full traversal.

use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::index::NodeIndex;
use crate::reconcile::reconcile;
use crate::remote::RemoteRepository;
use crate::store::{parent_path, LocalNode, LocalStore, ROOT_PATH};
use crate::sync::SyncEngine;
use crate::types::{ObjectKind, RemoteObject};

impl<R, S> SyncEngine<R, S>
where
    R: RemoteRepository + 'static,
    S: LocalStore,
{
    /// Create a document under the folder mirrored at `parent`.
    ///
    /// A `Conflict` from the repository is resolved optimistically: when a
    /// same-named document already exists under the remote parent (created
    /// by an earlier, interrupted push or by another client), that object is
    /// adopted instead of failing.
    pub async fn create_document(
        &mut self,
        parent: &str,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<LocalNode> {
        let parent_node = self.local_node(parent)?;
        let result = match self
            .repo
            .create_document(&parent_node.remote_id, name, content_type)
            .await
        {
            Err(SyncError::Conflict(reason)) => {
                adopt_existing(
                    self.repo.as_ref(),
                    &parent_node.remote_id,
                    name,
                    ObjectKind::Document,
                    reason,
                )
                .await
            }
            other => other,
        };
        let created = self.pushed(result)?;
        self.absorb(&created, &parent_node.path)
    }

    /// Create a folder under the folder mirrored at `parent`.
    pub async fn create_folder(&mut self, parent: &str, name: &str) -> Result<LocalNode> {
        let parent_node = self.local_node(parent)?;
        let result = match self.repo.create_folder(&parent_node.remote_id, name).await {
            Err(SyncError::Conflict(reason)) => {
                adopt_existing(
                    self.repo.as_ref(),
                    &parent_node.remote_id,
                    name,
                    ObjectKind::Folder,
                    reason,
                )
                .await
            }
            other => other,
        };
        let created = self.pushed(result)?;
        self.absorb(&created, &parent_node.path)
    }

    /// Rename and/or move the node at `path`. Returns `None` when the
    /// repository considered nothing changed.
    pub async fn update(
        &mut self,
        path: &str,
        new_parent: &str,
        new_name: &str,
    ) -> Result<Option<LocalNode>> {
        let node = self.local_node(path)?;
        if node.is_root() {
            return Err(SyncError::Unsupported("the root folder cannot be updated"));
        }
        let parent_node = self.local_node(new_parent)?;
        let result = self
            .repo
            .update(&node.remote_id, &parent_node.remote_id, new_name)
            .await;
        let Some(updated) = self.pushed(result)? else {
            debug!(path = %path, "repository reported no change");
            return Ok(None);
        };

        let relocated = if parent_path(&node.path) != Some(parent_node.path.as_str()) {
            self.store.move_node(&node, &parent_node.path, &updated.name)?
        } else {
            node
        };
        let out = reconcile(
            &mut self.store,
            self.types.as_ref(),
            &self.config.default_content_type,
            &updated,
            &parent_node.path,
            Some(relocated),
        )?;
        self.store.commit_chunk()?;
        Ok(Some(out.node))
    }

    /// Push a new content stream for the document at `path`.
    pub async fn update_content(
        &mut self,
        path: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<LocalNode> {
        let node = self.local_node(path)?;
        if !node.kind.is_document() {
            return Err(SyncError::Unsupported("content belongs to documents only"));
        }
        let result = self
            .repo
            .update_content(&node.remote_id, content_type, size)
            .await;
        let updated = self.pushed(result)?;
        let parent = parent_path(&node.path).unwrap_or(ROOT_PATH).to_string();
        let out = reconcile(
            &mut self.store,
            self.types.as_ref(),
            &self.config.default_content_type,
            &updated,
            &parent,
            Some(node),
        )?;
        self.store.commit_chunk()?;
        Ok(out.node)
    }

    /// Copy the node at `src` into the folder mirrored at `dest_parent`.
    pub async fn copy(
        &mut self,
        src: &str,
        dest_parent: &str,
        name: &str,
    ) -> Result<LocalNode> {
        let node = self.local_node(src)?;
        let parent_node = self.local_node(dest_parent)?;
        let result = self
            .repo
            .copy(&node.remote_id, &parent_node.remote_id, name)
            .await;
        let copied = self.pushed(result)?;
        self.absorb(&copied, &parent_node.path)
    }

    /// Delete the node at `path` remotely, then drop the local mirror.
    pub async fn remove(&mut self, path: &str) -> Result<()> {
        let node = self.local_node(path)?;
        if node.is_root() {
            return Err(SyncError::Unsupported("the root folder cannot be removed"));
        }
        let result = self.repo.delete(&node.remote_id).await;
        self.pushed(result)?;
        self.store.remove(&node.path)?;
        self.store.commit_chunk()?;
        info!(path = %path, "removed");
        Ok(())
    }

    /// Move to the repository trash. The document repository profile does
    /// not expose a trash, so removal is the only supported deletion.
    pub async fn trash(&mut self, _path: &str) -> Result<()> {
        Err(SyncError::Unsupported("trashing not supported"))
    }

    /// Restore from the repository trash.
    pub async fn untrash(&mut self, _path: &str) -> Result<()> {
        Err(SyncError::Unsupported("untrashing not supported"))
    }

    /// Re-mirror the object `id` after its local mirror was damaged or lost
    /// (typically at `path`). Existing filings whose parent still matches a
    /// remote parent are refreshed in place; filings the remote parent set
    /// no longer covers are dropped; missing filings are recreated, fetching
    /// the whole subtree when the object is a folder.
    pub async fn restore(&mut self, id: &str, path: &str) -> Result<()> {
        let object = match self.repo.object(id).await {
            Ok(object) => Some(object),
            Err(SyncError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let mut index = NodeIndex::read_from(&self.store)?;

        let Some(object) = object else {
            // Gone remotely: the damaged mirror goes away everywhere.
            info!(id = %id, path = %path, "object no longer exists remotely, removing mirrors");
            for node in index.get(id).map(<[_]>::to_vec).unwrap_or_default() {
                self.store.remove(&node.path)?;
            }
            if self.store.node_at(path)?.is_some() {
                self.store.remove(path)?;
            }
            self.store.commit_chunk()?;
            return Ok(());
        };

        let remote_parents = self.repo.parents(id).await?;
        let mut claimed: Vec<String> = Vec::new();

        // Refresh filings whose local parent still is a remote parent.
        for node in index.get(id).map(<[_]>::to_vec).unwrap_or_default() {
            let parent = parent_path(&node.path).unwrap_or(ROOT_PATH).to_string();
            let parent_matches = match self.store.node_at(&parent)? {
                Some(p) => remote_parents.iter().any(|rp| rp.id == p.remote_id),
                None => false,
            };
            if parent_matches {
                let out = reconcile(
                    &mut self.store,
                    self.types.as_ref(),
                    &self.config.default_content_type,
                    &object,
                    &parent,
                    Some(node),
                )?;
                claimed.push(parent.clone());
                if object.is_folder() {
                    self.restore_subtree(&object.id, &out.node.path).await?;
                }
            } else {
                warn!(path = %node.path, "dropping filing no longer present remotely");
                self.store.remove(&node.path)?;
            }
        }

        // Recreate filings under remote parents not yet covered.
        for remote_parent in &remote_parents {
            let Some(parents) = index.get(&remote_parent.id).map(<[_]>::to_vec) else {
                debug!(id = %remote_parent.id, "remote parent has no local mirror, skipping filing");
                continue;
            };
            for parent_node in parents {
                if claimed.contains(&parent_node.path) {
                    continue;
                }
                let out = reconcile(
                    &mut self.store,
                    self.types.as_ref(),
                    &self.config.default_content_type,
                    &object,
                    &parent_node.path,
                    None,
                )?;
                if object.is_folder() {
                    self.restore_subtree(&object.id, &out.node.path).await?;
                }
            }
        }

        index.remove_key(id);
        self.store.commit_chunk()?;
        Ok(())
    }

    /// Fetch and mirror the whole subtree of a restored folder, iteratively.
    async fn restore_subtree(&mut self, folder_id: &str, folder_path: &str) -> Result<()> {
        let mut stack = vec![(folder_id.to_string(), folder_path.to_string())];
        while let Some((fid, fpath)) = stack.pop() {
            self.cancel.check()?;
            for child in self.repo.children(&fid).await? {
                if child.is_relationship() {
                    continue;
                }
                let out = reconcile(
                    &mut self.store,
                    self.types.as_ref(),
                    &self.config.default_content_type,
                    &child,
                    &fpath,
                    None,
                )?;
                if child.is_folder() {
                    stack.push((child.id.clone(), out.node.path.clone()));
                }
            }
        }
        Ok(())
    }

    fn local_node(&self, path: &str) -> Result<LocalNode> {
        self.store
            .node_at(path)?
            .ok_or_else(|| SyncError::NotFound(format!("no local node at {path}")))
    }

    /// Mirror the remote result of a successful push and commit.
    fn absorb(&mut self, object: &RemoteObject, parent: &str) -> Result<LocalNode> {
        let out = reconcile(
            &mut self.store,
            self.types.as_ref(),
            &self.config.default_content_type,
            object,
            parent,
            None,
        )?;
        self.store.commit_chunk()?;
        Ok(out.node)
    }

    /// Check a finished push; transport or consistency failures raise the
    /// repair flag before propagating.
    fn pushed<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(e) if e.triggers_fallback() => {
                warn!(error = %e, "push to the repository failed, next sync will traverse");
                self.push_failed = true;
                Err(e)
            }
            other => other,
        }
    }
}

/// Find an already-existing same-named child to adopt after a `Conflict`.
async fn adopt_existing<R: RemoteRepository + ?Sized>(
    repo: &R,
    parent_id: &str,
    name: &str,
    kind: ObjectKind,
    reason: String,
) -> Result<RemoteObject> {
    for child in repo.children(parent_id).await? {
        if child.name == name && child.kind == kind {
            info!(id = %child.id, name = %name, "adopted existing remote object after conflict");
            return Ok(child);
        }
    }
    Err(SyncError::Conflict(reason))
}
