//! In-memory implementations of both external interfaces.
//!
//! [`MemoryRepository`] models a change-log-capable remote repository with
//! per-event tokens, multi-filing and vendor-style trashing; [`MemoryStore`]
//! is a node tree with real chunk-commit/rollback semantics. The test suite
//! runs the whole engine against this pair; they are also the quickest way
//! to try the crate without a live backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::remote::{RemoteRepository, RepositoryInfo};
use crate::store::{is_descendant, join_path, parent_path, LocalNode, LocalStore, ROOT_PATH};
use crate::types::{ChangeEvent, ChangeKind, ChangeToken, ObjectKind, RemoteObject};

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StoreState {
    /// path -> node; BTreeMap order yields parents before children.
    nodes: BTreeMap<String, LocalNode>,
    props: HashMap<(String, String), String>,
}

/// In-memory [`LocalStore`]. Mutations stay in a live copy until
/// [`commit_chunk`](LocalStore::commit_chunk); [`rollback`](LocalStore::rollback)
/// restores the last committed copy.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    live: StoreState,
    committed: StoreState,
    commits: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut state = StoreState::default();
        state.nodes.insert(ROOT_PATH.to_string(), empty_node(ROOT_PATH, "", "", ObjectKind::Folder));
        Self {
            committed: state.clone(),
            live: state,
            commits: 0,
        }
    }

    /// All live paths, in tree order. Test helper.
    pub fn paths(&self) -> Vec<String> {
        self.live.nodes.keys().cloned().collect()
    }

    /// Paths as of the last committed chunk. Test helper.
    pub fn committed_paths(&self) -> Vec<String> {
        self.committed.nodes.keys().cloned().collect()
    }

    /// Number of chunk commits so far. Test helper.
    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

fn empty_node(path: &str, id: &str, name: &str, kind: ObjectKind) -> LocalNode {
    LocalNode {
        path: path.to_string(),
        remote_id: id.to_string(),
        name: name.to_string(),
        kind,
        change_token: None,
        created: DateTime::<Utc>::UNIX_EPOCH,
        modified: DateTime::<Utc>::UNIX_EPOCH,
        created_by: String::new(),
        modified_by: String::new(),
        size: None,
        content_type: None,
        version_series_id: None,
        checked_out_id: None,
    }
}

impl LocalStore for MemoryStore {
    fn root(&self) -> Result<LocalNode> {
        self.live
            .nodes
            .get(ROOT_PATH)
            .cloned()
            .ok_or_else(|| SyncError::Storage("root node missing".into()))
    }

    fn open_or_create(
        &mut self,
        parent: &str,
        id: &str,
        name: &str,
        kind: ObjectKind,
    ) -> Result<(LocalNode, bool)> {
        if !self.live.nodes.contains_key(parent) {
            return Err(SyncError::Storage(format!("parent path not found: {parent}")));
        }
        let found = self
            .live
            .nodes
            .values()
            .find(|n| n.remote_id == id && parent_path(&n.path) == Some(parent))
            .cloned();
        if let Some(node) = found {
            return Ok((node, false));
        }
        let node = empty_node(&join_path(parent, name), id, name, kind);
        self.live.nodes.insert(node.path.clone(), node.clone());
        Ok((node, true))
    }

    fn update(&mut self, node: &LocalNode) -> Result<()> {
        self.live.nodes.insert(node.path.clone(), node.clone());
        Ok(())
    }

    fn move_node(
        &mut self,
        node: &LocalNode,
        new_parent: &str,
        new_name: &str,
    ) -> Result<LocalNode> {
        let old_path = node.path.clone();
        let new_path = join_path(new_parent, new_name);
        if old_path == new_path {
            return Ok(node.clone());
        }
        if !self.live.nodes.contains_key(&old_path) {
            return Err(SyncError::Storage(format!("move source not found: {old_path}")));
        }

        let moved: Vec<LocalNode> = self
            .live
            .nodes
            .values()
            .filter(|n| is_descendant(&n.path, &old_path))
            .cloned()
            .collect();
        for n in &moved {
            self.live.nodes.remove(&n.path);
        }
        for mut n in moved {
            n.path = format!("{new_path}{}", &n.path[old_path.len()..]);
            if n.path == new_path {
                n.name = new_name.to_string();
            }
            self.live.nodes.insert(n.path.clone(), n);
        }

        let rekeyed: Vec<((String, String), String)> = self
            .live
            .props
            .iter()
            .filter(|((p, _), _)| is_descendant(p, &old_path))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for ((p, key), value) in rekeyed {
            self.live.props.remove(&(p.clone(), key.clone()));
            let p = format!("{new_path}{}", &p[old_path.len()..]);
            self.live.props.insert((p, key), value);
        }

        self.node_at(&new_path)?
            .ok_or_else(|| SyncError::Storage(format!("move target missing: {new_path}")))
    }

    fn copy_node(&mut self, node: &LocalNode, new_parent: &str) -> Result<LocalNode> {
        if !self.live.nodes.contains_key(new_parent) {
            return Err(SyncError::Storage(format!("copy target parent not found: {new_parent}")));
        }
        let new_path = join_path(new_parent, &node.name);
        let copied: Vec<LocalNode> = self
            .live
            .nodes
            .values()
            .filter(|n| is_descendant(&n.path, &node.path))
            .cloned()
            .collect();
        for mut n in copied {
            n.path = format!("{new_path}{}", &n.path[node.path.len()..]);
            self.live.nodes.insert(n.path.clone(), n);
        }
        self.node_at(&new_path)?
            .ok_or_else(|| SyncError::Storage(format!("copy target missing: {new_path}")))
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        if path == ROOT_PATH {
            return Err(SyncError::Storage("cannot remove the root node".into()));
        }
        self.live.nodes.retain(|p, _| !is_descendant(p, path));
        self.live.props.retain(|(p, _), _| !is_descendant(p, path));
        Ok(())
    }

    fn node_at(&self, path: &str) -> Result<Option<LocalNode>> {
        Ok(self.live.nodes.get(path).cloned())
    }

    fn all_nodes(&self) -> Result<Vec<LocalNode>> {
        Ok(self.live.nodes.values().cloned().collect())
    }

    fn set_property(&mut self, path: &str, key: &str, value: &str) -> Result<()> {
        if !self.live.nodes.contains_key(path) {
            return Err(SyncError::Storage(format!("path not found: {path}")));
        }
        self.live
            .props
            .insert((path.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn get_property(&self, path: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .live
            .props
            .get(&(path.to_string(), key.to_string()))
            .cloned())
    }

    fn commit_chunk(&mut self) -> Result<()> {
        self.committed = self.live.clone();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.live = self.committed.clone();
        Ok(())
    }
}

// ============================================================================
// MemoryRepository
// ============================================================================

#[derive(Debug)]
struct RepoState {
    info: RepositoryInfo,
    objects: HashMap<String, RemoteObject>,
    trashed: HashSet<String>,
    /// (sequence, event); tokens are "t{sequence}".
    log: Vec<(u64, ChangeEvent)>,
    token_seq: u64,
    id_seq: u64,
    /// document id -> ids of its historical versions, latest first.
    versions: HashMap<String, Vec<String>>,
    fail_changes: bool,
    fail_writes: bool,
}

/// In-memory [`RemoteRepository`] with a recorded change log.
///
/// Mutators advance the token sequence and append a change event, so a test
/// drives the remote side exactly like a live repository would appear to the
/// engine.
#[derive(Debug)]
pub struct MemoryRepository {
    state: Mutex<RepoState>,
    root_id: String,
}

pub const ROOT_ID: &str = "root";

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            ROOT_ID.to_string(),
            RemoteObject {
                id: ROOT_ID.to_string(),
                name: String::new(),
                kind: ObjectKind::Folder,
                change_token: ChangeToken::empty(),
                created: Utc::now(),
                modified: Utc::now(),
                created_by: "system".into(),
                modified_by: "system".into(),
                size: None,
                content_type: None,
                parents: Vec::new(),
                version_series_id: None,
                checked_out_id: None,
            },
        );
        Self {
            state: Mutex::new(RepoState {
                info: RepositoryInfo {
                    name: "memory".into(),
                    vendor: "docsync".into(),
                    product: "memory-repository".into(),
                    change_log_supported: true,
                    trash_supported: false,
                },
                objects,
                trashed: HashSet::new(),
                log: Vec::new(),
                token_seq: 0,
                id_seq: 0,
                versions: HashMap::new(),
                fail_changes: false,
                fail_writes: false,
            }),
            root_id: ROOT_ID.to_string(),
        }
    }

    pub fn set_change_log_supported(&self, supported: bool) {
        self.lock().info.change_log_supported = supported;
    }

    /// Make the next `changes_since` calls fail at the transport level.
    pub fn set_fail_changes(&self, fail: bool) {
        self.lock().fail_changes = fail;
    }

    /// Make the next write operations fail at the transport level.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn add_folder(&self, id: &str, name: &str, parent_id: &str) -> RemoteObject {
        let mut state = self.lock();
        let obj = state.put_object(id, name, ObjectKind::Folder, vec![parent_id.to_string()]);
        state.record(ChangeKind::Created, id, Some(ObjectKind::Folder));
        obj
    }

    pub fn add_document(&self, id: &str, name: &str, parents: &[&str]) -> RemoteObject {
        let mut state = self.lock();
        let parents = parents.iter().map(|p| p.to_string()).collect();
        let mut obj = state.put_object(id, name, ObjectKind::Document, parents);
        obj.size = Some(0);
        state.objects.insert(id.to_string(), obj.clone());
        state.record(ChangeKind::Created, id, Some(ObjectKind::Document));
        obj
    }

    pub fn set_content_type(&self, id: &str, content_type: Option<&str>) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(id) {
            obj.content_type = content_type.map(str::to_string);
        }
    }

    pub fn set_version_series(&self, id: &str, series_id: &str, version_ids: &[&str]) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(id) {
            obj.version_series_id = Some(series_id.to_string());
        }
        state
            .versions
            .insert(id.to_string(), version_ids.iter().map(|v| v.to_string()).collect());
    }

    pub fn rename(&self, id: &str, new_name: &str) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(id) {
            obj.name = new_name.to_string();
            obj.modified = Utc::now();
        }
        state.record(ChangeKind::Updated, id, None);
    }

    /// Replace the filing parents of an object (re-filing / partial
    /// unfiling), recording an UPDATED event.
    pub fn set_parents(&self, id: &str, parents: &[&str]) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(id) {
            obj.parents = parents.iter().map(|p| p.to_string()).collect();
            obj.modified = Utc::now();
        }
        state.record(ChangeKind::Updated, id, None);
    }

    /// Touch an object's modification time, recording an UPDATED event.
    pub fn touch(&self, id: &str, modified: DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(id) {
            obj.modified = modified;
        }
        state.record(ChangeKind::Updated, id, None);
    }

    /// Delete an object (and, for folders, its subtree), recording a DELETED
    /// event for the top object only - descendants vanish silently, as
    /// repositories commonly report subtree deletion.
    pub fn remove_object(&self, id: &str) {
        let mut state = self.lock();
        state.remove_tree(id);
        state.record(ChangeKind::Deleted, id, None);
    }

    /// Vendor-style trashing: the object stops resolving (`NotFound`) but the
    /// change log reports a plain UPDATED event.
    pub fn trash(&self, id: &str) {
        let mut state = self.lock();
        state.trashed.insert(id.to_string());
        state.record(ChangeKind::Updated, id, None);
    }

    /// Append a raw change event without touching any object. Simulates
    /// repositories that emit version artifacts (extra CREATED events).
    pub fn push_event(&self, kind: ChangeKind, object_id: &str, hint: Option<ObjectKind>) {
        self.lock().record(kind, object_id, hint);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RepoState> {
        self.state.lock().expect("memory repository poisoned")
    }
}

impl RepoState {
    fn next_token(&mut self) -> ChangeToken {
        self.token_seq += 1;
        ChangeToken::new(format!("t{}", self.token_seq))
    }

    fn record(&mut self, kind: ChangeKind, object_id: &str, hint: Option<ObjectKind>) {
        let token = self.next_token();
        if let Some(obj) = self.objects.get_mut(object_id) {
            obj.change_token = token.clone();
        }
        self.log.push((
            self.token_seq,
            ChangeEvent {
                kind,
                object_id: object_id.to_string(),
                token,
                object_kind: hint,
            },
        ));
    }

    fn put_object(
        &mut self,
        id: &str,
        name: &str,
        kind: ObjectKind,
        parents: Vec<String>,
    ) -> RemoteObject {
        let now = Utc::now();
        let obj = RemoteObject {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            change_token: ChangeToken::empty(),
            created: now,
            modified: now,
            created_by: "alice".into(),
            modified_by: "alice".into(),
            size: None,
            content_type: None,
            parents,
            version_series_id: None,
            checked_out_id: None,
        };
        self.objects.insert(id.to_string(), obj.clone());
        obj
    }

    fn remove_tree(&mut self, id: &str) {
        let Some(obj) = self.objects.remove(id) else {
            return;
        };
        if obj.kind.is_folder() {
            let children: Vec<String> = self
                .objects
                .values()
                .filter(|o| o.parents.iter().any(|p| p == id))
                .map(|o| o.id.clone())
                .collect();
            for child_id in children {
                // multi-filed documents survive under their other parents
                let fully_contained = self
                    .objects
                    .get(&child_id)
                    .map(|o| o.parents.len() <= 1)
                    .unwrap_or(false);
                if fully_contained {
                    self.remove_tree(&child_id);
                } else if let Some(child) = self.objects.get_mut(&child_id) {
                    child.parents.retain(|p| p != id);
                }
            }
        }
    }

    fn resolve(&self, id: &str) -> Result<RemoteObject> {
        if self.trashed.contains(id) {
            return Err(SyncError::NotFound(id.to_string()));
        }
        self.objects
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    fn fresh_id(&mut self) -> String {
        self.id_seq += 1;
        format!("o{}", self.id_seq)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(SyncError::Transport("repository unavailable".into()));
        }
        Ok(())
    }

    fn child_by_name(&self, parent_id: &str, name: &str) -> Option<&RemoteObject> {
        self.objects
            .values()
            .find(|o| o.name == name && o.parents.iter().any(|p| p == parent_id))
    }
}

#[async_trait]
impl RemoteRepository for MemoryRepository {
    async fn repository_info(&self) -> Result<RepositoryInfo> {
        Ok(self.lock().info.clone())
    }

    async fn current_token(&self) -> Result<ChangeToken> {
        Ok(ChangeToken::new(format!("t{}", self.lock().token_seq)))
    }

    async fn root(&self) -> Result<RemoteObject> {
        self.lock().resolve(&self.root_id)
    }

    async fn children(&self, folder_id: &str) -> Result<Vec<RemoteObject>> {
        let state = self.lock();
        state.resolve(folder_id)?;
        let mut children: Vec<RemoteObject> = state
            .objects
            .values()
            .filter(|o| o.parents.iter().any(|p| p == folder_id))
            .filter(|o| !state.trashed.contains(&o.id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn changes_since(&self, token: &ChangeToken) -> Result<Vec<ChangeEvent>> {
        let state = self.lock();
        if state.fail_changes {
            return Err(SyncError::Transport("change log unavailable".into()));
        }
        let since = if token.is_empty() {
            0
        } else {
            token
                .as_str()
                .strip_prefix('t')
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| SyncError::Transport(format!("unknown change token: {token}")))?
        };
        Ok(state
            .log
            .iter()
            .filter(|(seq, _)| *seq > since)
            .map(|(_, ev)| ev.clone())
            .collect())
    }

    async fn object(&self, id: &str) -> Result<RemoteObject> {
        self.lock().resolve(id)
    }

    async fn parents(&self, id: &str) -> Result<Vec<RemoteObject>> {
        let state = self.lock();
        let obj = state.resolve(id)?;
        obj.parents.iter().map(|p| state.resolve(p)).collect()
    }

    async fn versions(&self, id: &str) -> Result<Vec<RemoteObject>> {
        let state = self.lock();
        let Some(version_ids) = state.versions.get(id) else {
            return Ok(Vec::new());
        };
        Ok(version_ids
            .iter()
            .filter_map(|v| state.objects.get(v).cloned())
            .collect())
    }

    async fn create_document(
        &self,
        parent_id: &str,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<RemoteObject> {
        let mut state = self.lock();
        state.check_writable()?;
        state.resolve(parent_id)?;
        if state.child_by_name(parent_id, name).is_some() {
            return Err(SyncError::Conflict(format!("name already exists: {name}")));
        }
        let id = state.fresh_id();
        let mut obj = state.put_object(&id, name, ObjectKind::Document, vec![parent_id.to_string()]);
        obj.size = Some(0);
        obj.content_type = content_type.map(str::to_string);
        state.objects.insert(id.clone(), obj.clone());
        state.record(ChangeKind::Created, &id, Some(ObjectKind::Document));
        state.resolve(&id)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteObject> {
        let mut state = self.lock();
        state.check_writable()?;
        state.resolve(parent_id)?;
        if state.child_by_name(parent_id, name).is_some() {
            return Err(SyncError::Conflict(format!("name already exists: {name}")));
        }
        let id = state.fresh_id();
        state.put_object(&id, name, ObjectKind::Folder, vec![parent_id.to_string()]);
        state.record(ChangeKind::Created, &id, Some(ObjectKind::Folder));
        state.resolve(&id)
    }

    async fn update(&self, id: &str, parent_id: &str, name: &str) -> Result<Option<RemoteObject>> {
        let mut state = self.lock();
        state.check_writable()?;
        let current = state.resolve(id)?;
        let refiled = !current.parents.iter().any(|p| p == parent_id);
        if current.name == name && !refiled {
            return Ok(None);
        }
        if let Some(obj) = state.objects.get_mut(id) {
            obj.name = name.to_string();
            if refiled {
                obj.parents = vec![parent_id.to_string()];
            }
            obj.modified = Utc::now();
        }
        state.record(ChangeKind::Updated, id, None);
        state.resolve(id).map(Some)
    }

    async fn update_content(
        &self,
        id: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<RemoteObject> {
        let mut state = self.lock();
        state.check_writable()?;
        state.resolve(id)?;
        if let Some(obj) = state.objects.get_mut(id) {
            obj.size = Some(size);
            if content_type.is_some() {
                obj.content_type = content_type.map(str::to_string);
            }
            obj.modified = Utc::now();
        }
        state.record(ChangeKind::Updated, id, None);
        state.resolve(id)
    }

    async fn copy(&self, id: &str, dest_parent_id: &str, name: &str) -> Result<RemoteObject> {
        let mut state = self.lock();
        state.check_writable()?;
        let source = state.resolve(id)?;
        state.resolve(dest_parent_id)?;
        let new_id = state.fresh_id();
        let mut copy = source;
        copy.id = new_id.clone();
        copy.name = name.to_string();
        copy.parents = vec![dest_parent_id.to_string()];
        copy.created = Utc::now();
        copy.modified = copy.created;
        let kind = copy.kind;
        state.objects.insert(new_id.clone(), copy);
        state.record(ChangeKind::Created, &new_id, Some(kind));
        state.resolve(&new_id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.check_writable()?;
        state.resolve(id)?;
        state.remove_tree(id);
        state.record(ChangeKind::Deleted, id, None);
        Ok(())
    }
}
