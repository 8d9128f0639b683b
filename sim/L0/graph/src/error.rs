//! Error types for transform store operations.

use rigsim_types::FrameId;
use thiserror::Error;

/// Errors returned by a [`TransformStore`](crate::TransformStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The frame does not exist.
    #[error("frame not found: {0}")]
    FrameNotFound(FrameId),

    /// The frame already exists.
    #[error("frame already exists: {0}")]
    FrameExists(FrameId),

    /// No edge joins the two frames.
    #[error("no transform between {origin} and {target}")]
    EdgeNotFound {
        /// Origin frame.
        origin: FrameId,
        /// Target frame.
        target: FrameId,
    },

    /// An edge already joins the two frames.
    #[error("transform between {origin} and {target} already exists")]
    EdgeExists {
        /// Origin frame.
        origin: FrameId,
        /// Target frame.
        target: FrameId,
    },

    /// The frames are in disconnected components.
    #[error("no path from {origin} to {target}")]
    Unreachable {
        /// Origin frame.
        origin: FrameId,
        /// Target frame.
        target: FrameId,
    },

    /// The store's internal lock was poisoned.
    #[error("transform store lock poisoned")]
    LockPoisoned,
}

impl GraphError {
    /// Create an edge-not-found error.
    #[must_use]
    pub fn edge_not_found(origin: &FrameId, target: &FrameId) -> Self {
        Self::EdgeNotFound {
            origin: origin.clone(),
            target: target.clone(),
        }
    }

    /// Check if this error reports a missing frame or edge.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FrameNotFound(_) | Self::EdgeNotFound { .. } | Self::Unreachable { .. }
        )
    }
}
