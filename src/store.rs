//! Local hierarchical store interface.
//!
//! The store is a given: a key-path node tree with transactional chunked
//! commits and rollback. The engine talks to it through this narrow trait
//! and never assumes anything about the backing storage. One [`LocalNode`]
//! mirrors one filing of one remote object under one local parent; a
//! multi-filed document therefore has one node per remote parent.
//!
//! Paths are `/`-separated, rooted at [`ROOT_PATH`]. The root node always
//! exists and mirrors the remote root folder.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChangeToken, ObjectKind};

/// Path of the drive root node.
pub const ROOT_PATH: &str = "/";

/// Join a parent path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent path of `path`, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Whether `path` equals `prefix` or lies inside the subtree under it.
pub fn is_descendant(path: &str, prefix: &str) -> bool {
    if prefix == ROOT_PATH {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// Local mirror of one filing of one remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalNode {
    pub path: String,
    pub remote_id: String,
    pub name: String,
    pub kind: ObjectKind,
    /// Change token stored at the last reconciliation; `None` when the
    /// repository reported no token for the object.
    pub change_token: Option<ChangeToken>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub created_by: String,
    pub modified_by: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub version_series_id: Option<String>,
    pub checked_out_id: Option<String>,
}

impl LocalNode {
    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }
}

/// Hierarchical node storage consumed by the engine.
///
/// All mutations are buffered until [`commit_chunk`](LocalStore::commit_chunk);
/// a chunk commit is the unit of crash-durability. [`rollback`](LocalStore::rollback)
/// discards everything since the last committed chunk.
pub trait LocalStore: Send {
    /// The root node. Always present.
    fn root(&self) -> Result<LocalNode>;

    /// Find the child of `parent_path` mirroring remote id `id`, or create an
    /// empty mirror named `name` under it. Returns the node and whether it
    /// was newly created.
    fn open_or_create(
        &mut self,
        parent_path: &str,
        id: &str,
        name: &str,
        kind: ObjectKind,
    ) -> Result<(LocalNode, bool)>;

    /// Persist the mirrored fields of `node` at `node.path`.
    fn update(&mut self, node: &LocalNode) -> Result<()>;

    /// Move/rename `node` (and its subtree) under `new_parent_path` as
    /// `new_name`. Returns the relocated node.
    fn move_node(
        &mut self,
        node: &LocalNode,
        new_parent_path: &str,
        new_name: &str,
    ) -> Result<LocalNode>;

    /// Copy `node` (and its subtree) under `new_parent_path`. Returns the new
    /// node.
    fn copy_node(&mut self, node: &LocalNode, new_parent_path: &str) -> Result<LocalNode>;

    /// Remove the node at `path` together with its subtree. Removing a
    /// missing path is not an error (idempotent cleanup).
    fn remove(&mut self, path: &str) -> Result<()>;

    fn node_at(&self, path: &str) -> Result<Option<LocalNode>>;

    /// Every node of the mirror including the root, parents before children.
    fn all_nodes(&self) -> Result<Vec<LocalNode>>;

    /// Auxiliary property on a node (sync position, drive identity).
    fn set_property(&mut self, path: &str, key: &str, value: &str) -> Result<()>;

    fn get_property(&self, path: &str, key: &str) -> Result<Option<String>>;

    /// Durably commit all buffered mutations.
    fn commit_chunk(&mut self) -> Result<()>;

    /// Discard all mutations since the last committed chunk.
    fn rollback(&mut self) -> Result<()>;
}
