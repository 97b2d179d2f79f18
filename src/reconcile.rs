//! The node-reconciliation primitive.
//!
//! Every create/update path of the engine - Connect, change-log replay,
//! full traversal, CRUD refresh - routes through [`reconcile`]. It is the
//! only place divergence between a remote object and its local mirror is
//! detected, so all algorithms share identical drift-detection semantics.

use tracing::debug;

use crate::error::Result;
use crate::store::{parent_path, LocalNode, LocalStore, ROOT_PATH};
use crate::types::RemoteObject;

/// Name-based content-type guessing. The real resolver is an external
/// collaborator; this trait is the narrow seam the engine consumes it
/// through.
pub trait ContentTypeResolver: Send + Sync {
    fn guess(&self, name: &str) -> Option<String>;
}

/// Resolver covering the common extensions. Enough for tests and for
/// repositories that report types reliably.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionTypeResolver;

impl ContentTypeResolver for ExtensionTypeResolver {
    fn guess(&self, name: &str) -> Option<String> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        let mime = match ext.as_str() {
            "txt" => "text/plain",
            "md" => "text/markdown",
            "html" | "htm" => "text/html",
            "csv" => "text/csv",
            "xml" => "application/xml",
            "json" => "application/json",
            "pdf" => "application/pdf",
            "zip" => "application/zip",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            _ => return None,
        };
        Some(mime.to_string())
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub node: LocalNode,
    /// Whether the local mirror was created or its mirrored fields were
    /// rewritten. `false` means the node was returned untouched.
    pub changed: bool,
    /// Whether the mirror was newly created by this call.
    pub created: bool,
}

/// Create or update the local mirror of `remote` under `parent_path`.
///
/// When `existing` is `None` the mirror is opened-or-created under the
/// parent, keyed by remote id; a newly created node is always reported
/// changed. Otherwise divergence is computed from change tokens when both
/// sides have one, and from **exact inequality** of modification timestamps
/// when either side lacks a token - a version rollback moves the remote
/// timestamp backward, which "remote is newer" comparisons would miss.
pub fn reconcile<S: LocalStore + ?Sized>(
    store: &mut S,
    types: &dyn ContentTypeResolver,
    default_type: &str,
    remote: &RemoteObject,
    parent: &str,
    existing: Option<LocalNode>,
) -> Result<Reconciled> {
    debug!(id = %remote.id, name = %remote.name, kind = ?remote.kind, "reconcile");

    let (mut node, created) = match existing {
        Some(node) => (node, false),
        None => store.open_or_create(parent, &remote.id, &remote.name, remote.kind)?,
    };

    let changed = created || diverged(remote, &node);
    if !changed {
        return Ok(Reconciled {
            node,
            changed: false,
            created: false,
        });
    }

    // Rename in place; relocation across parents is the caller's concern.
    if !created && !node.is_root() && node.name != remote.name {
        let parent = parent_path(&node.path).unwrap_or(ROOT_PATH);
        node = store.move_node(&node, parent, &remote.name)?;
    }

    let content_type = if remote.is_document() {
        Some(resolve_content_type(
            remote,
            node.content_type.as_deref(),
            types,
            default_type,
        ))
    } else {
        None
    };

    node.remote_id = remote.id.clone();
    node.name = remote.name.clone();
    node.kind = remote.kind;
    node.change_token = if remote.change_token.is_empty() {
        None
    } else {
        Some(remote.change_token.clone())
    };
    node.created = remote.created;
    node.modified = remote.modified;
    node.created_by = remote.created_by.clone();
    node.modified_by = remote.modified_by.clone();
    node.size = remote.size;
    node.content_type = content_type;
    node.version_series_id = remote.version_series_id.clone();
    node.checked_out_id = remote.checked_out_id.clone();
    store.update(&node)?;

    Ok(Reconciled {
        node,
        changed: true,
        created,
    })
}

fn diverged(remote: &RemoteObject, local: &LocalNode) -> bool {
    match (&local.change_token, remote.change_token.is_empty()) {
        (Some(local_token), false) => *local_token != remote.change_token,
        // No token on either side: exact timestamp inequality, so an edit
        // that restored an older version (timestamp moved backward) is still
        // detected.
        _ => remote.modified != local.modified,
    }
}

/// Fallback chain for a document's content type: explicit remote type (when
/// not the vendor default) -> name-based guess -> previously stored local
/// type -> configured default.
fn resolve_content_type(
    remote: &RemoteObject,
    local_type: Option<&str>,
    types: &dyn ContentTypeResolver,
    default_type: &str,
) -> String {
    if let Some(remote_type) = remote.content_type.as_deref() {
        if !remote_type.starts_with(default_type) {
            return remote_type.to_string();
        }
    }
    if let Some(guessed) = types.guess(&remote.name) {
        if !guessed.starts_with(default_type) {
            return guessed;
        }
    }
    if let Some(local_type) = local_type {
        return local_type.to_string();
    }
    default_type.to_string()
}
