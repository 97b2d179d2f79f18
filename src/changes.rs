//! Incremental synchronization by change-log replay.
//!
//! Strictly single-threaded and order-preserving: later events can depend
//! on earlier ones (renames, re-filings), so the log's total order is
//! applied exactly. Every mutation goes through the reconciliation
//! primitive; chunk commits persist the token of the last fully-applied
//! event so an interrupted replay resumes where it stopped.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::index::NodeIndex;
use crate::reconcile::{reconcile, ContentTypeResolver};
use crate::remote::RemoteRepository;
use crate::store::{parent_path, LocalNode, LocalStore, ROOT_PATH};
use crate::sync::{Checkpointer, SyncStats};
use crate::types::{ChangeKind, ChangeToken, RemoteObject};

pub(crate) struct ChangeLogReplay<'a, R: ?Sized, S> {
    repo: &'a R,
    store: &'a mut S,
    index: &'a mut NodeIndex,
    config: &'a SyncConfig,
    types: &'a dyn ContentTypeResolver,
    cancel: &'a Cancellation,
    stats: &'a mut SyncStats,
    checkpoint: Checkpointer,
}

/// State carried between consecutive events for the duplicate-version
/// suppression heuristic.
struct PreviousEvent {
    name: String,
    kind: ChangeKind,
    parent_ids: HashSet<String>,
}

impl<'a, R, S> ChangeLogReplay<'a, R, S>
where
    R: RemoteRepository + ?Sized,
    S: LocalStore,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        repo: &'a R,
        store: &'a mut S,
        index: &'a mut NodeIndex,
        config: &'a SyncConfig,
        types: &'a dyn ContentTypeResolver,
        cancel: &'a Cancellation,
        stats: &'a mut SyncStats,
    ) -> Self {
        let checkpoint = Checkpointer::new(config.chunk_size);
        Self {
            repo,
            store,
            index,
            config,
            types,
            cancel,
            stats,
            checkpoint,
        }
    }

    /// Replay all events strictly after `from`. Returns the token of the
    /// last event processed, or `None` when the log produced no events.
    pub(crate) async fn run(mut self, from: &ChangeToken) -> Result<Option<ChangeToken>> {
        let events = self.repo.changes_since(from).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let mut last_applied = None;
        let mut previous: Option<PreviousEvent> = None;
        for event in events {
            self.cancel.check()?;

            if !event.is_syncable() {
                // Untracked object type: no side effects, but the event still
                // advances the ordered progress.
                debug!(id = %event.object_id, "skipped change of unsupported object type");
                previous = None;
                last_applied = Some(event.token);
                continue;
            }

            let item = match event.kind {
                ChangeKind::Deleted => None,
                _ => match self.repo.object(&event.object_id).await {
                    Ok(obj) => Some(obj),
                    Err(SyncError::NotFound(_)) => {
                        // Removed during the fetch, or the vendor trashes on
                        // deletion; either way the mirror goes away.
                        debug!(id = %event.object_id, "object not found remotely, applying DELETED logic");
                        None
                    }
                    Err(e) => return Err(e),
                },
            };

            match item {
                None => {
                    debug!(id = %event.object_id, "file removal");
                    // Empty remaining-parent set: the object is fully gone.
                    self.delete_mirrors(&event.object_id, &HashSet::new())?;
                    self.checkpoint.mark(self.store, Some(&event.token))?;
                    previous = None;
                }
                Some(obj) if obj.is_relationship() => {
                    debug!(id = %obj.id, name = %obj.name, "skipped change of relationship");
                    last_applied = Some(event.token);
                    continue;
                }
                Some(obj) => {
                    let parent_ids = self.resolve_parent_ids(&obj).await?;
                    let Some(parent_ids) = parent_ids else {
                        // Root folder or an unfiled (orphan) document.
                        debug!(id = %obj.id, name = %obj.name, "skipped change of item without parent");
                        last_applied = Some(event.token);
                        continue;
                    };

                    if self.config.collapse_version_events {
                        if let Some(prev) = &previous {
                            // Same name created on an overlapping parent set
                            // by the previous event: this one is a version
                            // artifact of that creation, not a new object.
                            if prev.kind == ChangeKind::Created
                                && prev.name == obj.name
                                && prev.parent_ids.iter().all(|p| parent_ids.contains(p))
                            {
                                debug!(id = %obj.id, name = %obj.name, "collapsed version artifact event");
                                previous = None;
                                last_applied = Some(event.token);
                                continue;
                            }
                        }
                    }

                    self.apply_update(&obj, &parent_ids).await?;
                    self.checkpoint.mark(self.store, Some(&event.token))?;
                    previous = Some(PreviousEvent {
                        name: obj.name.clone(),
                        kind: event.kind,
                        parent_ids: parent_ids.iter().cloned().collect(),
                    });
                }
            }

            last_applied = Some(event.token);
        }

        Ok(last_applied)
    }

    /// Current filing parents of a changed object, or `None` when the change
    /// should be skipped (root, orphan).
    async fn resolve_parent_ids(&self, obj: &RemoteObject) -> Result<Option<Vec<String>>> {
        let parents = self.repo.parents(&obj.id).await?;
        if parents.is_empty() {
            return Ok(None);
        }
        let mut ids: Vec<String> = parents.into_iter().map(|p| p.id).collect();
        if obj.is_folder() {
            // folders file under at most one parent
            ids.truncate(1);
        }
        Ok(Some(ids))
    }

    /// Remove local mirrors of `id`, respecting multi-filing: a filing
    /// survives when its local parent is still among the remote parents.
    /// Removed subtrees are pruned from the index so descendants recorded in
    /// following events no longer resolve.
    fn delete_mirrors(&mut self, id: &str, remaining_parents: &HashSet<String>) -> Result<()> {
        let Some(filings) = self.index.get(id) else {
            return Ok(());
        };
        for node in filings.to_vec() {
            let parent = parent_path(&node.path).unwrap_or(ROOT_PATH);
            let Some(parent_node) = self.store.node_at(parent)? else {
                // parent already removed together with its subtree
                self.index.remove_path(&node.path);
                continue;
            };
            if !remaining_parents.contains(&parent_node.remote_id) {
                self.index.prune_subtree(&node.path);
                self.store.remove(&node.path)?;
                self.stats.removed += 1;
            }
        }
        Ok(())
    }

    /// Create/update the mirror under every current remote parent, then drop
    /// filings the parent set no longer covers.
    async fn apply_update(&mut self, obj: &RemoteObject, parent_ids: &[String]) -> Result<()> {
        let existing = self.find_mirrors(obj).await?.unwrap_or_default();
        let mut synced: HashSet<String> = HashSet::new();

        for pid in parent_ids {
            let parents = self
                .index
                .get(pid)
                .map(<[LocalNode]>::to_vec)
                .ok_or_else(|| {
                    SyncError::Inconsistent(format!(
                        "cannot find parent node for {} ({})",
                        obj.id, obj.name
                    ))
                })?;

            for parent_node in parents {
                let local = existing
                    .iter()
                    .find(|n| parent_path(&n.path) == Some(parent_node.path.as_str()))
                    .cloned();

                let out = match local {
                    None => {
                        // New filing. A folder already mirrored elsewhere is
                        // copied first so its subtree seeds the new filing
                        // before the primitive refreshes the metadata.
                        let seed = if obj.is_folder() {
                            match existing.first() {
                                Some(source) => {
                                    Some(self.store.copy_node(source, &parent_node.path)?)
                                }
                                None => None,
                            }
                        } else {
                            None
                        };
                        reconcile(
                            self.store,
                            self.types,
                            &self.config.default_content_type,
                            obj,
                            &parent_node.path,
                            seed,
                        )?
                    }
                    Some(node) if node.name != obj.name => {
                        // Renamed (or moved) remotely: relocate, then refresh.
                        // The store moves the whole subtree, so indexed
                        // descendant filings must follow the path change.
                        let moved = self.store.move_node(&node, &parent_node.path, &obj.name)?;
                        self.index.rewrite_prefix(&node.path, &moved.path);
                        reconcile(
                            self.store,
                            self.types,
                            &self.config.default_content_type,
                            obj,
                            &parent_node.path,
                            Some(moved),
                        )?
                    }
                    Some(node) => reconcile(
                        self.store,
                        self.types,
                        &self.config.default_content_type,
                        obj,
                        &parent_node.path,
                        Some(node),
                    )?,
                };

                if out.created {
                    self.stats.created += 1;
                } else if out.changed {
                    self.stats.updated += 1;
                }
                synced.insert(out.node.path.clone());
                self.register(out.node);
            }
        }

        // filings the current parent set does not cover go away
        let mut stale: Vec<String> = existing
            .iter()
            .map(|n| n.path.clone())
            .chain(
                self.index
                    .get(&obj.id)
                    .into_iter()
                    .flatten()
                    .map(|n| n.path.clone()),
            )
            .filter(|path| !synced.contains(path))
            .collect();
        stale.sort();
        stale.dedup();
        for path in stale {
            // a rename already vacated its old path
            if self.store.node_at(&path)?.is_none() {
                self.index.remove_path(&path);
                continue;
            }
            self.index.prune_subtree(&path);
            self.store.remove(&path)?;
            self.stats.removed += 1;
        }

        Ok(())
    }

    fn register(&mut self, node: LocalNode) {
        let id = node.remote_id.clone();
        let vsid = node.version_series_id.clone();
        let coid = node.checked_out_id.clone();
        self.index.insert(node);
        if let Some(vsid) = vsid {
            self.index.alias(&vsid, &id);
        }
        if let Some(coid) = coid {
            self.index.alias(&coid, &id);
        }
    }

    /// Locate existing filings of `obj`. A document unknown by its primary
    /// id may be known under its version-series id, or under the id of one
    /// of its historical versions (each version carries its own id).
    async fn find_mirrors(&self, obj: &RemoteObject) -> Result<Option<Vec<LocalNode>>> {
        if let Some(filings) = self.index.get(&obj.id) {
            return Ok(Some(filings.to_vec()));
        }
        if !obj.is_document() {
            return Ok(None);
        }

        let mut matches: Vec<(String, Vec<LocalNode>)> = Vec::new();
        if let Some(vsid) = &obj.version_series_id {
            if let Some(filings) = self.index.get(vsid) {
                matches.push((vsid.clone(), filings.to_vec()));
            }
        }
        match self.repo.versions(&obj.id).await {
            Ok(versions) => {
                for version in versions {
                    if matches.iter().any(|(key, _)| *key == version.id) {
                        continue;
                    }
                    if let Some(filings) = self.index.get(&version.id) {
                        matches.push((version.id.clone(), filings.to_vec()));
                    }
                }
            }
            Err(SyncError::NotFound(_)) => {
                debug!(id = %obj.id, name = %obj.name, "remote versions cannot be found");
            }
            Err(e) => return Err(e),
        }

        if matches.len() > 1 {
            // Ambiguous: several local candidates claim this document. Take
            // the first but make the ambiguity visible.
            warn!(
                id = %obj.id,
                name = %obj.name,
                keys = ?matches.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                "multiple local candidates for versioned document, using the first"
            );
        }
        Ok(matches.into_iter().next().map(|(_, filings)| filings))
    }
}
