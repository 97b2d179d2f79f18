//! Full-tree traversal synchronization.
//!
//! The fallback pass when no change log is available (or replay failed):
//! concurrent folder readers walk the remote tree and feed a single
//! consumer that applies every item through the reconciliation primitive.
//! Items whose parent has not been consumed yet are postponed once and
//! retried at the end of the queue. Local nodes never matched by a remote
//! item are leftovers and get removed at the end.
//!
//! ```text
//! reader(root) ──┐
//! reader(a)   ───┼──> queue ──> consumer ──> store + index
//! reader(a/b) ───┘                 │
//!                                  └──> leftover removal
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::index::NodeIndex;
use crate::reconcile::{reconcile, ContentTypeResolver};
use crate::remote::RemoteRepository;
use crate::store::{is_descendant, LocalStore};
use crate::sync::{Checkpointer, SyncStats};
use crate::types::RemoteObject;

/// A remote item waiting for the consumer. `postponed` marks the second
/// attempt: a parent still missing then is a real inconsistency.
struct Item {
    object: RemoteObject,
    parent_id: String,
    postponed: bool,
}

/// State shared between the folder readers.
struct Shared<R: ?Sized> {
    repo: Arc<R>,
    queue: UnboundedSender<Item>,
    errors: UnboundedSender<SyncError>,
    active: AtomicUsize,
    cancel: Cancellation,
}

pub(crate) struct Traversal<'a, R: ?Sized, S> {
    repo: Arc<R>,
    store: &'a mut S,
    config: &'a SyncConfig,
    types: &'a dyn ContentTypeResolver,
    cancel: &'a Cancellation,
    stats: &'a mut SyncStats,
    checkpoint: Checkpointer,
}

impl<'a, R, S> Traversal<'a, R, S>
where
    R: RemoteRepository + ?Sized + 'static,
    S: LocalStore,
{
    pub(crate) fn new(
        repo: Arc<R>,
        store: &'a mut S,
        config: &'a SyncConfig,
        types: &'a dyn ContentTypeResolver,
        cancel: &'a Cancellation,
        stats: &'a mut SyncStats,
    ) -> Self {
        let checkpoint = Checkpointer::new(config.chunk_size);
        Self {
            repo,
            store,
            config,
            types,
            cancel,
            stats,
            checkpoint,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        // `leftovers` starts as the full pre-pass tree and shrinks as remote
        // items claim their filings; `known` grows with every reconciled
        // node so items arriving out of order still resolve their parent.
        let mut leftovers = NodeIndex::read_from(self.store)?;
        let mut known = leftovers.clone();

        let root = self.store.root()?;
        let root_id = root.remote_id.clone();

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Item>();
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<SyncError>();
        let shared = Arc::new(Shared {
            repo: Arc::clone(&self.repo),
            queue: queue_tx.clone(),
            errors: errors_tx,
            active: AtomicUsize::new(0),
            cancel: self.cancel.clone(),
        });
        spawn_reader(Arc::clone(&shared), root_id.clone());

        loop {
            self.cancel.check()?;
            if let Ok(err) = errors_rx.try_recv() {
                return Err(err);
            }
            match queue_rx.try_recv() {
                Ok(item) => {
                    self.consume(item, &queue_tx, &mut known, &mut leftovers)?;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    if shared.active.load(Ordering::SeqCst) == 0 {
                        // readers done, drain what they queued last
                        while let Ok(item) = queue_rx.try_recv() {
                            self.cancel.check()?;
                            self.consume(item, &queue_tx, &mut known, &mut leftovers)?;
                        }
                        break;
                    }
                    sleep(self.config.traversal_poll).await;
                }
            }
        }
        if let Ok(err) = errors_rx.try_recv() {
            return Err(err);
        }

        self.remove_leftovers(leftovers, &root_id)
    }

    /// Apply one queued item under every local mirror of its remote parent.
    fn consume(
        &mut self,
        item: Item,
        queue: &UnboundedSender<Item>,
        known: &mut NodeIndex,
        leftovers: &mut NodeIndex,
    ) -> Result<()> {
        let Some(parents) = known.get(&item.parent_id).map(<[_]>::to_vec) else {
            if item.postponed {
                return Err(SyncError::Inconsistent(format!(
                    "parent cannot be found for remote item {} ({})",
                    item.object.id, item.object.name
                )));
            }
            // Parent not consumed yet: requeue behind everything pending.
            debug!(id = %item.object.id, name = %item.object.name, "postponing item, parent not yet known");
            let _ = queue.send(Item {
                postponed: true,
                ..item
            });
            return Ok(());
        };

        for parent_node in parents {
            let out = reconcile(
                self.store,
                self.types,
                &self.config.default_content_type,
                &item.object,
                &parent_node.path,
                None,
            )?;
            if out.created {
                self.stats.created += 1;
            } else if out.changed {
                self.stats.updated += 1;
            }
            if out.changed {
                self.checkpoint.mark(self.store, None)?;
            }
            let node = out.node;

            // Claimed: whatever of this id lived under this parent is
            // accounted for and must not be treated as a leftover.
            leftovers.remove_filings_under(&node.remote_id, &parent_node.path);
            if let Some(vsid) = &node.version_series_id {
                leftovers.remove_filings_under(vsid, &parent_node.path);
                known.alias(vsid, &node.remote_id);
            }
            if let Some(coid) = &node.checked_out_id {
                leftovers.remove_filings_under(coid, &parent_node.path);
                known.alias(coid, &node.remote_id);
            }
            debug!(id = %node.remote_id, path = %node.path, "traversed remote item");
            known.insert(node);
        }
        Ok(())
    }

    /// Remove local nodes no remote item claimed during the pass. Sorting
    /// lets each removed subtree skip its own descendants.
    fn remove_leftovers(&mut self, mut leftovers: NodeIndex, root_id: &str) -> Result<()> {
        leftovers.remove_key(root_id);
        let mut paths: Vec<String> = leftovers.nodes().map(|n| n.path.clone()).collect();
        paths.sort();
        paths.dedup();

        let mut removed: Vec<String> = Vec::new();
        for path in paths {
            self.cancel.check()?;
            if removed.iter().any(|p| is_descendant(&path, p)) {
                continue;
            }
            debug!(path = %path, "removing node absent remotely");
            self.store.remove(&path)?;
            self.stats.removed += 1;
            self.checkpoint.mark(self.store, None)?;
            removed.push(path);
        }
        Ok(())
    }
}

/// Spawn a reader task for one remote folder. The future is boxed because
/// readers spawn readers for subfolders.
fn spawn_reader<R>(shared: Arc<Shared<R>>, folder_id: String)
where
    R: RemoteRepository + ?Sized + 'static,
{
    shared.active.fetch_add(1, Ordering::SeqCst);
    let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(read_folder(shared, folder_id));
    tokio::spawn(fut);
}

async fn read_folder<R>(shared: Arc<Shared<R>>, folder_id: String)
where
    R: RemoteRepository + ?Sized + 'static,
{
    if !shared.cancel.is_cancelled() {
        match shared.repo.children(&folder_id).await {
            Ok(children) => {
                for child in children {
                    if shared.cancel.is_cancelled() {
                        break;
                    }
                    if child.is_relationship() {
                        debug!(id = %child.id, name = %child.name, "skipped relationship object");
                        continue;
                    }
                    let subfolder = child.is_folder().then(|| child.id.clone());
                    let item = Item {
                        object: child,
                        parent_id: folder_id.clone(),
                        postponed: false,
                    };
                    if shared.queue.send(item).is_err() {
                        break;
                    }
                    if let Some(id) = subfolder {
                        spawn_reader(Arc::clone(&shared), id);
                    }
                }
            }
            Err(e) => {
                warn!(folder = %folder_id, error = %e, "folder listing failed");
                let _ = shared.errors.send(e);
            }
        }
    }
    shared.active.fetch_sub(1, Ordering::SeqCst);
}
