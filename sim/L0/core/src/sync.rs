//! Writing solved body poses back into the transform store.
//!
//! The synchronizer walks the tree rooted at its root frame from the top
//! down, carrying `acc`, the pose of the root expressed in the current
//! frame. For a frame bound to a dynamic, independently simulated node, the
//! edge from its parent becomes `acc(parent) ∘ world_pose(node)`. Every other
//! edge is left as the store has it. Children receive
//! `acc(child) = edge(parent → child)⁻¹ ∘ acc(parent)`.
//!
//! A transform structure with cross edges is rejected before any edge is
//! written.

use hashbrown::HashMap;
use rigsim_graph::{Transform, TransformStore, TreeView};
use rigsim_types::{FrameId, NodeId, Pose, SimError};

use crate::node::NodeRole;

/// Pose of a node, as the synchronizer needs it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePose {
    /// World pose of the node.
    pub pose: Pose,
    /// Role of the node.
    pub role: NodeRole,
    /// Whether the node has a dynamic body.
    pub movable: bool,
}

impl NodePose {
    /// Whether this pose should be written into the store.
    #[must_use]
    pub fn drives_frame(&self) -> bool {
        self.movable && self.role.writes_pose()
    }
}

/// Where the synchronizer reads node poses from.
pub trait PoseSource {
    /// Current pose of `node`, or `None` when the node is unknown.
    fn node_pose(&self, node: NodeId) -> Option<NodePose>;
}

/// Propagates solved poses top-down from a root frame.
#[derive(Debug, Clone)]
pub struct TransformSynchronizer {
    root: FrameId,
    bindings: HashMap<FrameId, NodeId>,
    view: Option<TreeView>,
}

impl TransformSynchronizer {
    /// Synchronizer rooted at `root`. The root frame stands for world
    /// coordinates.
    #[must_use]
    pub fn new(root: impl Into<FrameId>) -> Self {
        Self {
            root: root.into(),
            bindings: HashMap::new(),
            view: None,
        }
    }

    /// The root frame.
    #[must_use]
    pub fn root(&self) -> &FrameId {
        &self.root
    }

    /// Let `node` drive `frame`. Replaces any earlier binding of the frame.
    pub fn bind(&mut self, frame: impl Into<FrameId>, node: NodeId) {
        self.bindings.insert(frame.into(), node);
    }

    /// Forget the binding of `frame`. Returns the node it was bound to.
    pub fn unbind(&mut self, frame: &FrameId) -> Option<NodeId> {
        self.bindings.remove(frame)
    }

    /// Forget every binding to `node`.
    pub fn unbind_node(&mut self, node: NodeId) {
        self.bindings.retain(|_, n| *n != node);
    }

    /// Node bound to `frame`.
    #[must_use]
    pub fn binding(&self, frame: &FrameId) -> Option<NodeId> {
        self.bindings.get(frame).copied()
    }

    /// The cached tree view, rebuilt when the store changed structurally.
    pub fn refresh_view(&mut self, store: &dyn TransformStore) -> rigsim_types::Result<&TreeView> {
        let revision = store.revision();
        let stale = self
            .view
            .as_ref()
            .is_none_or(|view| view.revision() != revision);
        if stale {
            let view = store
                .tree_view(&self.root)
                .map_err(|e| SimError::transform_store(e.to_string()))?;
            tracing::debug!(root = %self.root, frames = view.len(), revision, "rebuilt tree view");
            self.view = Some(view);
        }
        self.view
            .as_ref()
            .ok_or_else(|| SimError::transform_store("tree view unavailable"))
    }

    /// Write every driving node's pose into the edge joining its frame to
    /// the parent frame, stamped with `time`.
    ///
    /// Returns the number of edges written.
    ///
    /// # Errors
    ///
    /// [`SimError::StructuralLoop`] when the structure under the root is not
    /// a tree; nothing is written in that case. Store failures surface as
    /// [`SimError::TransformStore`].
    pub fn propagate(
        &mut self,
        store: &dyn TransformStore,
        physics: &dyn PoseSource,
        time: f64,
    ) -> rigsim_types::Result<usize> {
        let to_sim = |e: rigsim_graph::GraphError| SimError::transform_store(e.to_string());

        self.refresh_view(store)?;
        let Some(view) = self.view.as_ref() else {
            return Ok(0);
        };
        if let Some((source, target)) = view.cross_edges().first() {
            tracing::error!(%source, %target, "loop in transform tree");
            return Err(SimError::structural_loop(source.as_str(), target.as_str()));
        }

        let mut written = 0;
        let mut worklist: Vec<(FrameId, Pose)> = view
            .children(&self.root)
            .iter()
            .map(|child| (child.clone(), Pose::identity()))
            .collect();
        worklist.reverse();

        while let Some((frame, parent_acc)) = worklist.pop() {
            let Some(parent) = view.parent(&frame) else {
                continue;
            };

            let driven = self
                .bindings
                .get(&frame)
                .and_then(|&node| physics.node_pose(node))
                .filter(NodePose::drives_frame);

            let edge = if let Some(node) = driven {
                let edge = Transform::stamped(parent_acc.compose(&node.pose), time);
                store
                    .update_transform(parent, &frame, edge)
                    .map_err(to_sim)?;
                written += 1;
                edge
            } else {
                store.transform(parent, &frame).map_err(to_sim)?
            };

            let acc = edge.pose.inverse().compose(&parent_acc);
            for child in view.children(&frame).iter().rev() {
                worklist.push((child.clone(), acc));
            }
        }

        tracing::trace!(written, time, "propagated poses");
        Ok(written)
    }
}
