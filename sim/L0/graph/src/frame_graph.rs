//! In-memory transform store.
//!
//! Frames are vertices, transforms are edges stored in both directions (the
//! reverse direction holds the inverse). Lookups between non-adjacent frames
//! compose the transforms along the breadth-first path between them.

use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::{HashMap, HashSet};
use rigsim_types::FrameId;

use crate::{GraphError, Result, Transform, TransformStore, TreeView};

#[derive(Debug, Clone)]
struct Edge {
    target: FrameId,
    transform: Transform,
}

#[derive(Debug, Default)]
struct Inner {
    /// Frame -> outgoing edges, in insertion order.
    edges: HashMap<FrameId, Vec<Edge>>,
    revision: u64,
}

impl Inner {
    fn edge_mut(&mut self, origin: &FrameId, target: &FrameId) -> Option<&mut Edge> {
        self.edges
            .get_mut(origin)?
            .iter_mut()
            .find(|e| &e.target == target)
    }

    fn has_edge(&self, origin: &FrameId, target: &FrameId) -> bool {
        self.edges
            .get(origin)
            .is_some_and(|edges| edges.iter().any(|e| &e.target == target))
    }

    fn ensure_frame(&mut self, frame: &FrameId) {
        if !self.edges.contains_key(frame) {
            self.edges.insert(frame.clone(), Vec::new());
        }
    }

    /// Breadth-first path from `origin` to `target`, as the list of hops.
    fn path(&self, origin: &FrameId, target: &FrameId) -> Option<Vec<(FrameId, FrameId)>> {
        let mut came_from: HashMap<&FrameId, &FrameId> = HashMap::new();
        let mut queue = VecDeque::from([origin]);
        let mut seen: HashSet<&FrameId> = HashSet::from([origin]);

        while let Some(frame) = queue.pop_front() {
            if frame == target {
                let mut hops = Vec::new();
                let mut cursor = frame;
                while let Some(&prev) = came_from.get(cursor) {
                    hops.push((prev.clone(), cursor.clone()));
                    cursor = prev;
                }
                hops.reverse();
                return Some(hops);
            }
            for edge in self.edges.get(frame).into_iter().flatten() {
                if seen.insert(&edge.target) {
                    came_from.insert(&edge.target, frame);
                    queue.push_back(&edge.target);
                }
            }
        }
        None
    }
}

/// Thread-safe in-memory [`TransformStore`].
///
/// # Example
///
/// ```
/// use rigsim_graph::{FrameGraph, Transform, TransformStore};
/// use rigsim_types::{FrameId, Pose};
/// use nalgebra::Point3;
///
/// let graph = FrameGraph::new();
/// let root = FrameId::from("root");
/// let arm = FrameId::from("arm");
/// graph
///     .add_transform(&root, &arm, Transform::new(Pose::from_position(Point3::new(0.0, 0.0, 1.0))))
///     .unwrap();
///
/// let back = graph.transform(&arm, &root).unwrap();
/// assert_eq!(back.pose.position.z, -1.0);
/// ```
#[derive(Debug, Default)]
pub struct FrameGraph {
    inner: RwLock<Inner>,
}

impl FrameGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| GraphError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| GraphError::LockPoisoned)
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.read().map_or(0, |inner| inner.edges.len())
    }

    /// Remove the edge between two frames, in both directions.
    pub fn remove_transform(&self, origin: &FrameId, target: &FrameId) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.has_edge(origin, target) {
            return Err(GraphError::edge_not_found(origin, target));
        }
        for (from, to) in [(origin, target), (target, origin)] {
            if let Some(edges) = inner.edges.get_mut(from) {
                edges.retain(|e| &e.target != to);
            }
        }
        inner.revision += 1;
        Ok(())
    }
}

impl TransformStore for FrameGraph {
    fn contains_frame(&self, frame: &FrameId) -> bool {
        self.read().is_ok_and(|inner| inner.edges.contains_key(frame))
    }

    fn add_frame(&self, frame: FrameId) -> Result<()> {
        let mut inner = self.write()?;
        if inner.edges.contains_key(&frame) {
            return Err(GraphError::FrameExists(frame));
        }
        inner.edges.insert(frame, Vec::new());
        inner.revision += 1;
        Ok(())
    }

    fn add_transform(
        &self,
        origin: &FrameId,
        target: &FrameId,
        transform: Transform,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner.has_edge(origin, target) {
            return Err(GraphError::EdgeExists {
                origin: origin.clone(),
                target: target.clone(),
            });
        }
        inner.ensure_frame(origin);
        inner.ensure_frame(target);
        if let Some(edges) = inner.edges.get_mut(origin) {
            edges.push(Edge {
                target: target.clone(),
                transform,
            });
        }
        if let Some(edges) = inner.edges.get_mut(target) {
            edges.push(Edge {
                target: origin.clone(),
                transform: transform.inverse(),
            });
        }
        inner.revision += 1;
        Ok(())
    }

    fn update_transform(
        &self,
        origin: &FrameId,
        target: &FrameId,
        transform: Transform,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let forward = inner
            .edge_mut(origin, target)
            .ok_or_else(|| GraphError::edge_not_found(origin, target))?;
        forward.transform = transform;
        if let Some(reverse) = inner.edge_mut(target, origin) {
            reverse.transform = transform.inverse();
        }
        Ok(())
    }

    fn transform(&self, origin: &FrameId, target: &FrameId) -> Result<Transform> {
        let inner = self.read()?;
        for frame in [origin, target] {
            if !inner.edges.contains_key(frame) {
                return Err(GraphError::FrameNotFound(frame.clone()));
            }
        }

        let hops = inner
            .path(origin, target)
            .ok_or_else(|| GraphError::Unreachable {
                origin: origin.clone(),
                target: target.clone(),
            })?;

        hops.iter().try_fold(Transform::identity(), |acc, (from, to)| {
            inner
                .edges
                .get(from)
                .and_then(|edges| edges.iter().find(|e| &e.target == to))
                .map(|e| acc.then(&e.transform))
                .ok_or_else(|| GraphError::edge_not_found(from, to))
        })
    }

    fn tree_view(&self, root: &FrameId) -> Result<TreeView> {
        let inner = self.read()?;
        if !inner.edges.contains_key(root) {
            return Err(GraphError::FrameNotFound(root.clone()));
        }

        let mut view = TreeView::new(root.clone(), inner.revision);
        let mut parent_of: HashMap<&FrameId, &FrameId> = HashMap::new();
        let mut reported: HashSet<(&FrameId, &FrameId)> = HashSet::new();
        let mut queue = VecDeque::from([root]);
        let mut seen: HashSet<&FrameId> = HashSet::from([root]);

        while let Some(frame) = queue.pop_front() {
            for edge in inner.edges.get(frame).into_iter().flatten() {
                let next = &edge.target;
                if parent_of.get(frame) == Some(&next) {
                    continue;
                }
                if seen.insert(next) {
                    parent_of.insert(next, frame);
                    view.add_edge(frame.clone(), next.clone());
                    queue.push_back(next);
                } else {
                    let key = if frame <= next {
                        (frame, next)
                    } else {
                        (next, frame)
                    };
                    if reported.insert(key) {
                        tracing::debug!(source = %frame, target = %next, "cross edge in transform graph");
                        view.add_cross_edge(frame.clone(), next.clone());
                    }
                }
            }
        }

        Ok(view)
    }

    fn revision(&self) -> u64 {
        self.read().map_or(0, |inner| inner.revision)
    }
}
