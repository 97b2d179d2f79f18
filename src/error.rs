//! Error taxonomy for the synchronization engine.
//!
//! Errors split into three behavioral groups, handled at the [`SyncEngine`]
//! boundary (see `sync.rs`):
//! - deletion signals and local recoveries (`NotFound`, `Conflict`),
//! - pass-aborting but repairable (`Inconsistent`, `Transport` - trigger a
//!   rollback and a fall back to full traversal),
//! - surfaced to the caller (`Unauthorized`, `Unsupported`, `Storage`).
//!
//! Cancellation is modeled as an error to unwind loops quickly, but the
//! facade converts it into a clean no-op outcome before it reaches a caller.
//!
//! [`SyncEngine`]: crate::sync::SyncEngine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote object does not exist (anymore). During change replay this is a
    /// deletion signal, not a failure.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// Authentication or access rejection from the remote repository.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate-name rejection on create. Recovered by adopting the existing
    /// remote object when names and kinds match.
    #[error("remote conflict: {0}")]
    Conflict(String),

    /// Operation not available for this repository profile (e.g. trash).
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Fatal to the current pass: local mirror and remote state cannot be
    /// brought together by the running algorithm.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Remote call failed at the transport level.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local store failure.
    #[error("store error: {0}")]
    Storage(String),

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Cooperative cancellation was requested.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the running algorithm should give up and let the facade fall
    /// back to full traversal.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, SyncError::Inconsistent(_) | SyncError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_classification() {
        assert!(SyncError::Inconsistent("x".into()).triggers_fallback());
        assert!(SyncError::Transport("x".into()).triggers_fallback());
        assert!(!SyncError::NotFound("x".into()).triggers_fallback());
        assert!(!SyncError::Unauthorized("x".into()).triggers_fallback());
        assert!(!SyncError::Cancelled.triggers_fallback());
    }
}
