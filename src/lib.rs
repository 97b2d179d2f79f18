//! docsync: mirror a remote tree-structured document repository into a
//! local hierarchical store.
//!
//! The engine is read-mostly: `connect()` performs the initial full fetch,
//! then each `sync()` pass replays the repository change log when one is
//! available and falls back to a concurrent full-tree traversal when it is
//! not. Local edits are pushed through the CRUD adapter and the remote
//! reply is folded back into the mirror.
//!
//! # Architecture
//!
//! ```text
//!                +-----------------------+
//!                |      SyncEngine       |
//!                | connect()  sync()     |
//!                +----+------------+-----+
//!        change log   |            |   no log / drift
//!                     v            v
//!             +-------------+  +-------------+
//!             | ChangeLog   |  |  Traversal  |
//!             | replay      |  |  (readers + |
//!             | (ordered)   |  |   consumer) |
//!             +------+------+  +------+------+
//!                    |                |
//!                    v                v
//!             +---------------------------+
//!             |  reconcile() primitive    |
//!             |  RemoteObject -> LocalNode|
//!             +------------+--------------+
//!                          v
//!              RemoteRepository / LocalStore traits
//! ```
//!
//! Both algorithms funnel every mirror mutation through the single
//! [`reconcile`] primitive and checkpoint progress in bounded chunks; the
//! committed [`SyncPosition`] never gets ahead of applied state.

pub mod cancel;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;

mod changes;
mod connect;
mod crud;
mod traversal;

pub use cancel::Cancellation;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use index::NodeIndex;
pub use reconcile::{reconcile, ContentTypeResolver, ExtensionTypeResolver, Reconciled};
pub use remote::{RemoteRepository, RepositoryInfo};
pub use store::{is_descendant, join_path, parent_path, LocalNode, LocalStore, ROOT_PATH};
pub use sync::{
    read_position, SyncEngine, SyncOutcome, SyncReport, SyncStats, PROP_CHANGE_ID,
    PROP_CHANGE_TOKEN, PROP_DRIVE_ID,
};
pub use types::{
    ChangeEvent, ChangeKind, ChangeToken, ObjectKind, RemoteObject, SyncPosition,
};
