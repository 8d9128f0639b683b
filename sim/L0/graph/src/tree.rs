//! Cached parent/children snapshot of a transform structure.

use hashbrown::HashMap;
use rigsim_types::FrameId;

/// Parent→children adjacency of the frames reachable from `root`.
///
/// Built by breadth-first search over the store's edges. Any edge that would
/// close a cycle is not part of the tree; it is listed in
/// [`cross_edges`](Self::cross_edges) instead. A view with no cross edges
/// describes a tree.
#[derive(Debug, Clone, Default)]
pub struct TreeView {
    root: Option<FrameId>,
    children: HashMap<FrameId, Vec<FrameId>>,
    parent: HashMap<FrameId, FrameId>,
    cross_edges: Vec<(FrameId, FrameId)>,
    revision: u64,
}

impl TreeView {
    /// Empty view rooted at `root`, stamped with the store revision it was
    /// built from.
    #[must_use]
    pub fn new(root: FrameId, revision: u64) -> Self {
        Self {
            root: Some(root),
            children: HashMap::new(),
            parent: HashMap::new(),
            cross_edges: Vec::new(),
            revision,
        }
    }

    /// Record a tree edge.
    pub fn add_edge(&mut self, parent: FrameId, child: FrameId) {
        self.parent.insert(child.clone(), parent.clone());
        self.children.entry(parent).or_default().push(child);
    }

    /// Record a non-tree edge.
    pub fn add_cross_edge(&mut self, source: FrameId, target: FrameId) {
        self.cross_edges.push((source, target));
    }

    /// The root frame.
    #[must_use]
    pub fn root(&self) -> Option<&FrameId> {
        self.root.as_ref()
    }

    /// Children of `frame`, in discovery order.
    #[must_use]
    pub fn children(&self, frame: &FrameId) -> &[FrameId] {
        self.children.get(frame).map_or(&[], Vec::as_slice)
    }

    /// Parent of `frame`; `None` for the root and for unreachable frames.
    #[must_use]
    pub fn parent(&self, frame: &FrameId) -> Option<&FrameId> {
        self.parent.get(frame)
    }

    /// Whether `frame` is reachable from the root.
    #[must_use]
    pub fn contains(&self, frame: &FrameId) -> bool {
        self.root.as_ref() == Some(frame) || self.parent.contains_key(frame)
    }

    /// Edges that are not part of the tree.
    #[must_use]
    pub fn cross_edges(&self) -> &[(FrameId, FrameId)] {
        &self.cross_edges
    }

    /// Number of frames in the tree, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.root.is_some()) + self.parent.len()
    }

    /// Whether the view has no root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Store revision this view was built from.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
