//! Synchronization facade.
//!
//! [`SyncEngine`] owns the remote handle and the local store and decides,
//! once per pass, which algorithm runs:
//!
//! ```text
//! start -> no-op            remote token equals the committed token
//!       -> change-log       incremental replay (preferred)
//!       -> traversal        fallback: no change-log capability, empty
//!                           tokens, a failed local-edit push, or a
//!                           change-log error mid-replay
//! commit: SyncPosition = (new token, pass-start time), atomically with the
//! last checkpointed chunk - never ahead of applied state.
//! ```
//!
//! Cancellation surfaces to the caller as a clean `Cancelled` outcome, not
//! an error; nothing is committed for a cancelled pass and a retry is safe
//! because every mirror write is an idempotent upsert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cancel::Cancellation;
use crate::changes::ChangeLogReplay;
use crate::config::SyncConfig;
use crate::connect::fetch_tree;
use crate::error::{Result, SyncError};
use crate::index::NodeIndex;
use crate::reconcile::{ContentTypeResolver, ExtensionTypeResolver};
use crate::remote::RemoteRepository;
use crate::store::{LocalStore, ROOT_PATH};
use crate::traversal::Traversal;
use crate::types::{ChangeToken, SyncPosition};

/// Root-node property holding the committed change token.
pub const PROP_CHANGE_TOKEN: &str = "sync.changeToken";
/// Root-node property holding the pass-start timestamp (RFC 3339).
pub const PROP_CHANGE_ID: &str = "sync.changeId";
/// Root-node property holding the remote root (drive) id.
pub const PROP_DRIVE_ID: &str = "sync.driveId";

/// Which path a pass took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Initial full fetch.
    Connected,
    /// Remote and local tokens matched; nothing to do.
    NoChanges,
    /// Incremental change-log replay completed.
    ChangeLog,
    /// Full-tree traversal completed.
    Traversal,
    /// The pass was cancelled before committing; no state changed durably.
    Cancelled,
}

/// Mirror mutation counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Result of one `connect()` or `sync()` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub stats: SyncStats,
}

/// Buffers store mutations into bounded chunks; each chunk commit also
/// persists the token of the last fully-applied change event so an
/// interrupted pass resumes without reprocessing applied events.
pub(crate) struct Checkpointer {
    chunk_size: usize,
    pending: usize,
}

impl Checkpointer {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            pending: 0,
        }
    }

    /// Record one applied mutation; commits the chunk when full. `applied` is
    /// the change-log position covering everything in the chunk, when the
    /// running algorithm has one.
    pub(crate) fn mark<S: LocalStore>(
        &mut self,
        store: &mut S,
        applied: Option<&ChangeToken>,
    ) -> Result<()> {
        self.pending += 1;
        if self.pending < self.chunk_size {
            return Ok(());
        }
        if let Some(token) = applied {
            store.set_property(ROOT_PATH, PROP_CHANGE_TOKEN, token.as_str())?;
        }
        store.commit_chunk()?;
        self.pending = 0;
        Ok(())
    }
}

/// Read the committed sync position, if the mirror has one.
pub fn read_position<S: LocalStore>(store: &S) -> Result<Option<SyncPosition>> {
    let Some(token) = store.get_property(ROOT_PATH, PROP_CHANGE_TOKEN)? else {
        return Ok(None);
    };
    let Some(change_id) = store.get_property(ROOT_PATH, PROP_CHANGE_ID)? else {
        return Ok(None);
    };
    let change_id = DateTime::parse_from_rfc3339(&change_id)
        .map_err(|e| SyncError::Storage(format!("bad change id: {e}")))?
        .with_timezone(&Utc);
    Ok(Some(SyncPosition {
        token: ChangeToken::new(token),
        change_id,
    }))
}

fn write_position<S: LocalStore>(store: &mut S, position: &SyncPosition) -> Result<()> {
    store.set_property(ROOT_PATH, PROP_CHANGE_TOKEN, position.token.as_str())?;
    store.set_property(ROOT_PATH, PROP_CHANGE_ID, &position.change_id.to_rfc3339())?;
    Ok(())
}

/// The synchronization engine. One instance mirrors one remote repository
/// into one local store.
pub struct SyncEngine<R, S> {
    pub(crate) repo: Arc<R>,
    pub(crate) store: S,
    pub(crate) config: SyncConfig,
    pub(crate) types: Box<dyn ContentTypeResolver>,
    pub(crate) cancel: Cancellation,
    /// Set when pushing a local edit to the remote side failed; the next
    /// pass repairs any resulting drift with a full traversal.
    pub(crate) push_failed: bool,
}

impl<R, S> SyncEngine<R, S>
where
    R: RemoteRepository + 'static,
    S: LocalStore,
{
    pub fn new(repo: Arc<R>, store: S, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            store,
            config,
            types: Box::new(ExtensionTypeResolver),
            cancel: Cancellation::new(),
            push_failed: false,
        })
    }

    /// Replace the name-based content-type resolver.
    pub fn with_type_resolver(mut self, types: impl ContentTypeResolver + 'static) -> Self {
        self.types = Box::new(types);
        self
    }

    /// Handle for cancelling in-flight passes from another task.
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Initial full-tree fetch into an empty mirror.
    ///
    /// The repository token is read *before* traversal begins and committed
    /// as the starting position, so a remote change racing the fetch is
    /// replayed by the next pass instead of being lost. On cancellation
    /// whatever was fetched remains (upserts are idempotent) but no position
    /// is committed; a retried connect re-verifies and completes the rest.
    pub async fn connect(&mut self) -> Result<SyncReport> {
        let result = fetch_tree(
            self.repo.as_ref(),
            &mut self.store,
            &self.config,
            self.types.as_ref(),
            &self.cancel,
        )
        .await;

        match result {
            Ok((drive_id, position, stats)) => {
                self.store.set_property(ROOT_PATH, PROP_DRIVE_ID, &drive_id)?;
                write_position(&mut self.store, &position)?;
                self.store.commit_chunk()?;
                info!(drive = %drive_id, token = %position.token, "connect complete");
                Ok(SyncReport {
                    outcome: SyncOutcome::Connected,
                    stats,
                })
            }
            Err(SyncError::Cancelled) => Ok(SyncReport {
                outcome: SyncOutcome::Cancelled,
                stats: SyncStats::default(),
            }),
            Err(e) => Err(e),
        }
    }

    /// One synchronization pass.
    pub async fn sync(&mut self) -> Result<SyncReport> {
        match self.sync_pass().await {
            Err(SyncError::Cancelled) => Ok(SyncReport {
                outcome: SyncOutcome::Cancelled,
                stats: SyncStats::default(),
            }),
            other => other,
        }
    }

    async fn sync_pass(&mut self) -> Result<SyncReport> {
        let pass_start = Utc::now();
        let info = self.repo.repository_info().await?;
        let remote_token = self.repo.current_token().await?;
        let local_token = read_position(&self.store)?
            .map(|p| p.token)
            .unwrap_or_else(ChangeToken::empty);

        let try_changelog = if self.push_failed {
            // A failed local-edit push may have left the mirror inconsistent
            // in ways the change log cannot see; traverse to repair.
            warn!("previous push to the repository failed, forcing full traversal");
            false
        } else if remote_token.is_empty() || local_token.is_empty() {
            false
        } else if remote_token == local_token {
            return Ok(SyncReport {
                outcome: SyncOutcome::NoChanges,
                stats: SyncStats::default(),
            });
        } else if !info.change_log_supported {
            info!(
                repository = %info.name,
                vendor = %info.vendor,
                "change log not supported, full traversal will be used"
            );
            false
        } else {
            true
        };

        let mut stats = SyncStats::default();
        let mut outcome = SyncOutcome::Traversal;
        let mut committed_token = remote_token.clone();

        let mut need_traversal = !try_changelog;
        if try_changelog {
            let mut index = NodeIndex::read_from(&self.store)?;
            let replay = ChangeLogReplay::new(
                self.repo.as_ref(),
                &mut self.store,
                &mut index,
                &self.config,
                self.types.as_ref(),
                &self.cancel,
                &mut stats,
            );
            match replay.run(&local_token).await {
                Ok(Some(last_applied)) => {
                    committed_token = last_applied;
                    outcome = SyncOutcome::ChangeLog;
                }
                Ok(None) => {
                    // Token moved but the log produced nothing to replay;
                    // only a traversal can tell what actually changed.
                    need_traversal = true;
                }
                Err(e) if e.triggers_fallback() => {
                    warn!(error = %e, "change-log replay failed, falling back to full traversal");
                    self.store.rollback()?;
                    stats = SyncStats::default();
                    need_traversal = true;
                }
                Err(e) => return Err(e),
            }
        }

        if need_traversal {
            committed_token = remote_token;
            let traversal = Traversal::new(
                Arc::clone(&self.repo),
                &mut self.store,
                &self.config,
                self.types.as_ref(),
                &self.cancel,
                &mut stats,
            );
            traversal.run().await?;
            outcome = SyncOutcome::Traversal;
        }

        write_position(
            &mut self.store,
            &SyncPosition {
                token: committed_token,
                change_id: pass_start,
            },
        )?;
        self.store.commit_chunk()?;
        self.push_failed = false;

        Ok(SyncReport { outcome, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn position_round_trip() {
        let mut store = MemoryStore::new();
        assert!(read_position(&store).unwrap().is_none());

        let position = SyncPosition {
            token: ChangeToken::new("t7"),
            change_id: Utc::now(),
        };
        write_position(&mut store, &position).unwrap();
        let read = read_position(&store).unwrap().unwrap();
        assert_eq!(read.token, position.token);
        assert_eq!(
            read.change_id.timestamp_millis(),
            position.change_id.timestamp_millis()
        );
    }

    #[test]
    fn checkpointer_commits_full_chunks_only() {
        let mut store = MemoryStore::new();
        let mut checkpoint = Checkpointer::new(3);
        let token = ChangeToken::new("t9");

        checkpoint.mark(&mut store, Some(&token)).unwrap();
        checkpoint.mark(&mut store, Some(&token)).unwrap();
        assert_eq!(store.commit_count(), 0);
        // uncommitted: the token property must not be durable yet
        assert!(store
            .get_property(ROOT_PATH, PROP_CHANGE_TOKEN)
            .unwrap()
            .is_none());

        checkpoint.mark(&mut store, Some(&token)).unwrap();
        assert_eq!(store.commit_count(), 1);
        assert_eq!(
            store.get_property(ROOT_PATH, PROP_CHANGE_TOKEN).unwrap(),
            Some("t9".to_string())
        );
    }
}
