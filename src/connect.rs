//! Initial full-tree fetch.
//!
//! Populates an empty mirror with every reachable non-relationship object,
//! depth first. The repository change token is read before the first folder
//! listing and becomes the committed starting position: any remote change
//! happening during the fetch lands after that token and is picked up by the
//! next incremental pass instead of being lost.

use chrono::Utc;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::{reconcile, ContentTypeResolver};
use crate::remote::RemoteRepository;
use crate::store::LocalStore;
use crate::sync::{Checkpointer, SyncStats};
use crate::types::SyncPosition;

/// Fetch the whole remote tree into the store. Returns the remote root id
/// and the position/stats to commit. The caller persists both; nothing is
/// durable if this returns an error.
pub(crate) async fn fetch_tree<R, S>(
    repo: &R,
    store: &mut S,
    config: &SyncConfig,
    types: &dyn ContentTypeResolver,
    cancel: &Cancellation,
) -> Result<(String, SyncPosition, SyncStats)>
where
    R: RemoteRepository + ?Sized,
    S: LocalStore,
{
    cancel.check()?;

    // Token first, then the tree: the committed position must predate
    // everything the fetch observes.
    let token = repo.current_token().await?;
    let change_id = Utc::now();

    let root_obj = repo.root().await?;
    let root_node = store.root()?;
    let root_path = root_node.path.clone();
    let mut stats = SyncStats::default();
    let mut checkpoint = Checkpointer::new(config.chunk_size);

    let root = reconcile(
        store,
        types,
        &config.default_content_type,
        &root_obj,
        &root_path,
        Some(root_node),
    )?;
    if root.changed {
        stats.updated += 1;
    }

    // Depth-first: each discovered folder is pushed and listed in turn.
    let mut folders = vec![(root_obj.id.clone(), root.node.path)];
    while let Some((folder_id, parent)) = folders.pop() {
        cancel.check()?;
        for item in repo.children(&folder_id).await? {
            cancel.check()?;
            if item.is_relationship() {
                debug!(id = %item.id, name = %item.name, "skipped relationship object");
                continue;
            }
            let out = reconcile(store, types, &config.default_content_type, &item, &parent, None)?;
            if out.created && !out.changed {
                // The create branch of the primitive must always mark new
                // nodes changed; on an empty mirror every call creates.
                return Err(SyncError::Inconsistent(format!(
                    "fetched item was not stored as changed: {} ({})",
                    item.id, item.name
                )));
            }
            // An unchanged pre-existing node is a retried connect
            // re-verifying what an interrupted pass already wrote.
            if out.created {
                stats.created += 1;
            } else if out.changed {
                stats.updated += 1;
            }
            if out.changed {
                checkpoint.mark(store, None)?;
            }
            if item.is_folder() {
                folders.push((item.id, out.node.path));
            }
        }
    }

    Ok((root_obj.id, SyncPosition { token, change_id }, stats))
}
