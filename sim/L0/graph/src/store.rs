//! The transform store interface consumed by the physics engine.

use rigsim_types::FrameId;

use crate::{Result, Transform, TreeView};

/// A hierarchical store of frames joined by time-stamped rigid transforms.
///
/// Implementations own their synchronization: every method takes `&self`.
/// Callers never hold a store lock across calls, so the store can be shared
/// between the stepping thread and readers such as renderers and sensors.
pub trait TransformStore: Send + Sync {
    /// Whether the frame exists.
    fn contains_frame(&self, frame: &FrameId) -> bool;

    /// Add a frame with no edges.
    fn add_frame(&self, frame: FrameId) -> Result<()>;

    /// Add an edge `origin -> target`. Missing frames are created.
    fn add_transform(&self, origin: &FrameId, target: &FrameId, transform: Transform)
    -> Result<()>;

    /// Overwrite the transform of an existing edge.
    ///
    /// Updating an edge is not a structural change: the store revision stays
    /// the same.
    fn update_transform(
        &self,
        origin: &FrameId,
        target: &FrameId,
        transform: Transform,
    ) -> Result<()>;

    /// Pose of `target` expressed in `origin`, composed along the path
    /// between them.
    fn transform(&self, origin: &FrameId, target: &FrameId) -> Result<Transform>;

    /// Parent→children view of the frames reachable from `root`, with every
    /// non-tree edge enumerated.
    fn tree_view(&self, root: &FrameId) -> Result<TreeView>;

    /// Counter bumped by every structural change (frames or edges added or
    /// removed). Used to decide when a cached [`TreeView`] is stale.
    fn revision(&self) -> u64;
}
