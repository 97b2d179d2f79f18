//! In-memory index of local mirror nodes keyed by remote identity.
//!
//! One slot holds every filing of one remote object (multi-filing). Alias
//! keys - a document's version-series id and its checked-out id - resolve to
//! the same slot as the primary id, so a change event naming any identity of
//! a versioned document finds the same set of local nodes.
//!
//! The index is single-writer: during traversal only the consumer mutates
//! it, producers read a pre-pass snapshot (a plain clone).

use std::collections::HashMap;

use crate::error::Result;
use crate::store::{is_descendant, LocalNode, LocalStore};

#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    /// Remote id or alias -> slot index.
    keys: HashMap<String, usize>,
    /// Filing sets. Slots are never reused; an emptied slot just stays empty.
    slots: Vec<Vec<LocalNode>>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from every node in the store, registering
    /// version-series and checked-out aliases for documents.
    pub fn read_from<S: LocalStore + ?Sized>(store: &S) -> Result<Self> {
        let mut index = Self::new();
        for node in store.all_nodes()? {
            let vsid = node.version_series_id.clone();
            let coid = node.checked_out_id.clone();
            let id = node.remote_id.clone();
            index.insert(node);
            if let Some(vsid) = vsid {
                index.alias(&vsid, &id);
            }
            if let Some(coid) = coid {
                index.alias(&coid, &id);
            }
        }
        Ok(index)
    }

    /// Add or replace the filing of `node` (matched by path) in the slot of
    /// its remote id.
    pub fn insert(&mut self, node: LocalNode) {
        let slot = self.slot_for(&node.remote_id);
        let filings = &mut self.slots[slot];
        match filings.iter_mut().find(|n| n.path == node.path) {
            Some(existing) => *existing = node,
            None => filings.push(node),
        }
    }

    /// Point `alias` at the slot of `id`. No-op when `id` is unknown.
    pub fn alias(&mut self, alias: &str, id: &str) {
        if let Some(&slot) = self.keys.get(id) {
            self.keys.entry(alias.to_string()).or_insert(slot);
        }
    }

    /// Filings of the object identified by `key` (a primary id or an alias).
    /// `None` when the key is unknown or its slot has been emptied.
    pub fn get(&self, key: &str) -> Option<&[LocalNode]> {
        let &slot = self.keys.get(key)?;
        let filings = &self.slots[slot];
        if filings.is_empty() {
            None
        } else {
            Some(filings)
        }
    }

    /// Remove the filing at exactly `path` from every slot.
    pub fn remove_path(&mut self, path: &str) {
        for filings in &mut self.slots {
            filings.retain(|n| n.path != path);
        }
    }

    /// Rewrite the paths of every filing at or under `old_prefix` to sit
    /// under `new_prefix` instead. Must accompany every `move_node` on a
    /// store whose index outlives the move: the store relocates the whole
    /// subtree, so descendant filings indexed by their old paths would
    /// otherwise go stale and later events would resolve dead paths.
    pub fn rewrite_prefix(&mut self, old_prefix: &str, new_prefix: &str) {
        if old_prefix == new_prefix {
            return;
        }
        for filings in &mut self.slots {
            for node in filings.iter_mut() {
                if is_descendant(&node.path, old_prefix) {
                    node.path = format!("{new_prefix}{}", &node.path[old_prefix.len()..]);
                }
            }
        }
    }

    /// Remove every filing at or under `prefix` from every slot. Used when a
    /// folder subtree is deleted so that descendants recorded in following
    /// changes no longer resolve.
    pub fn prune_subtree(&mut self, prefix: &str) {
        for filings in &mut self.slots {
            filings.retain(|n| !is_descendant(&n.path, prefix));
        }
    }

    /// Remove from the slot of `key` every filing at or under `prefix`,
    /// leaving other slots alone. Used by traversal to mark one filing (or a
    /// folder subtree filing) as seen remotely.
    pub fn remove_filings_under(&mut self, key: &str, prefix: &str) {
        if let Some(&slot) = self.keys.get(key) {
            self.slots[slot].retain(|n| !is_descendant(&n.path, prefix));
        }
    }

    /// Drop the slot content for `key` without touching other slots.
    pub fn remove_key(&mut self, key: &str) {
        if let Some(&slot) = self.keys.get(key) {
            self.slots[slot].clear();
        }
    }

    /// Every filing still present, slot by slot. Alias keys do not duplicate
    /// their slot here.
    pub fn nodes(&self) -> impl Iterator<Item = &LocalNode> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_empty())
    }

    fn slot_for(&mut self, id: &str) -> usize {
        if let Some(&slot) = self.keys.get(id) {
            return slot;
        }
        self.slots.push(Vec::new());
        let slot = self.slots.len() - 1;
        self.keys.insert(id.to_string(), slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeToken, ObjectKind};
    use chrono::Utc;

    fn node(id: &str, path: &str) -> LocalNode {
        LocalNode {
            path: path.into(),
            remote_id: id.into(),
            name: path.rsplit('/').next().unwrap().into(),
            kind: ObjectKind::Document,
            change_token: Some(ChangeToken::new("t")),
            created: Utc::now(),
            modified: Utc::now(),
            created_by: "u".into(),
            modified_by: "u".into(),
            size: Some(1),
            content_type: None,
            version_series_id: None,
            checked_out_id: None,
        }
    }

    #[test]
    fn multi_filing_shares_one_slot() {
        let mut index = NodeIndex::new();
        index.insert(node("d1", "/p1/doc"));
        index.insert(node("d1", "/p2/doc"));
        assert_eq!(index.get("d1").unwrap().len(), 2);

        index.remove_path("/p1/doc");
        let filings = index.get("d1").unwrap();
        assert_eq!(filings.len(), 1);
        assert_eq!(filings[0].path, "/p2/doc");
    }

    #[test]
    fn alias_resolves_to_primary_slot() {
        let mut index = NodeIndex::new();
        index.insert(node("d1", "/p/doc"));
        index.alias("vs-1", "d1");
        index.alias("pwc-1", "d1");

        assert_eq!(index.get("vs-1").unwrap()[0].path, "/p/doc");
        assert_eq!(index.get("pwc-1").unwrap()[0].path, "/p/doc");

        // emptying through the primary id empties the alias view too
        index.remove_path("/p/doc");
        assert!(index.get("vs-1").is_none());
    }

    #[test]
    fn prune_subtree_drops_descendants_only() {
        let mut index = NodeIndex::new();
        index.insert(node("f1", "/a"));
        index.insert(node("d1", "/a/doc"));
        index.insert(node("d2", "/ab"));

        index.prune_subtree("/a");
        assert!(index.get("f1").is_none());
        assert!(index.get("d1").is_none());
        assert!(index.get("d2").is_some());
    }

    #[test]
    fn rewrite_prefix_relocates_descendants() {
        let mut index = NodeIndex::new();
        index.insert(node("f1", "/a"));
        index.insert(node("d1", "/a/doc"));
        index.insert(node("d2", "/ab"));

        index.rewrite_prefix("/a", "/z");
        assert_eq!(index.get("f1").unwrap()[0].path, "/z");
        assert_eq!(index.get("d1").unwrap()[0].path, "/z/doc");
        // sibling with a shared name prefix is untouched
        assert_eq!(index.get("d2").unwrap()[0].path, "/ab");
    }

    #[test]
    fn insert_replaces_same_path_filing() {
        let mut index = NodeIndex::new();
        index.insert(node("d1", "/p/doc"));
        let mut updated = node("d1", "/p/doc");
        updated.size = Some(99);
        index.insert(updated);
        let filings = index.get("d1").unwrap();
        assert_eq!(filings.len(), 1);
        assert_eq!(filings[0].size, Some(99));
    }
}
