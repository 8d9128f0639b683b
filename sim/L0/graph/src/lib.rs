//! Hierarchical transform store for simulated robots.
//!
//! Frames are named vertices; edges carry time-stamped rigid transforms
//! between a parent and a child frame. The physics engine consumes this crate
//! through the object-safe [`TransformStore`] trait:
//!
//! - [`TransformStore::update_transform`] - write solved poses into edges
//! - [`TransformStore::transform`] - compose poses along the path between two frames
//! - [`TransformStore::tree_view`] - parent→children snapshot with cross-edge enumeration
//!
//! [`FrameGraph`] is a thread-safe in-memory implementation.
//!
//! # Edge Convention
//!
//! The transform on edge `origin -> target` is the pose of `target` expressed
//! in `origin`. The reverse edge always holds the inverse.

#![doc(html_root_url = "https://docs.rs/rigsim-graph/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn, // Many methods can't be const due to nalgebra
    clippy::missing_errors_doc,   // Error docs added where non-obvious
)]

mod error;
mod frame_graph;
mod store;
mod transform;
mod tree;

pub use error::GraphError;
pub use frame_graph::FrameGraph;
pub use store::TransformStore;
pub use transform::Transform;
pub use tree::TreeView;

/// Result type for transform store operations.
pub type Result<T> = std::result::Result<T, GraphError>;
