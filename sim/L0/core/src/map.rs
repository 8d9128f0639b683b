//! Registry of height-field maps keyed by frame.
//!
//! A map is registered under the frame that carries it. At the start of each
//! detection pass the registry resolves every entry into an [`ActiveMap`]:
//! the provider's current height field plus the map's world pose, read from
//! the transform store when one is attached. A provider with no data, or a
//! frame the store doesn't know, simply means "no map" for that step.

use std::sync::Arc;

use hashbrown::HashMap;
use rigsim_graph::TransformStore;
use rigsim_types::{FrameId, Pose};

use crate::heightfield::HeightFieldData;

/// Source of a height field that may change between steps.
pub trait HeightFieldProvider: Send + Sync {
    /// Current height field, or `None` while no map is available.
    fn height_field(&self) -> Option<Arc<HeightFieldData>>;
}

impl HeightFieldProvider for Arc<HeightFieldData> {
    fn height_field(&self) -> Option<Arc<HeightFieldData>> {
        Some(Arc::clone(self))
    }
}

struct MapEntry {
    provider: Arc<dyn HeightFieldProvider>,
    pose: Pose,
}

impl std::fmt::Debug for MapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEntry")
            .field("pose", &self.pose)
            .finish_non_exhaustive()
    }
}

/// A map resolved for one detection pass.
#[derive(Debug, Clone)]
pub struct ActiveMap {
    /// Frame the map is registered under.
    pub frame: FrameId,
    /// Height data.
    pub data: Arc<HeightFieldData>,
    /// World pose of the map's local frame.
    pub pose: Pose,
}

/// Height-field maps keyed by frame id.
#[derive(Debug, Default)]
pub struct MapRegistry {
    maps: HashMap<FrameId, MapEntry>,
}

impl MapRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the map carried by `frame`.
    ///
    /// `pose` is used when no transform store is attached or the store
    /// doesn't know the frame yet.
    pub fn register(
        &mut self,
        frame: FrameId,
        provider: Arc<dyn HeightFieldProvider>,
        pose: Pose,
    ) {
        self.maps.insert(frame, MapEntry { provider, pose });
    }

    /// Drop the map carried by `frame`. Returns whether one was registered.
    pub fn remove(&mut self, frame: &FrameId) -> bool {
        self.maps.remove(frame).is_some()
    }

    /// Number of registered maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Whether no map is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Resolve the maps that have data this step, ordered by frame.
    ///
    /// With a store attached, the pose is the transform from `root` to the
    /// map frame. A frame the store can't reach is skipped.
    #[must_use]
    pub fn resolve(&self, store: Option<(&dyn TransformStore, &FrameId)>) -> Vec<ActiveMap> {
        let mut active: Vec<ActiveMap> = self
            .maps
            .iter()
            .filter_map(|(frame, entry)| {
                let data = entry.provider.height_field()?;
                let pose = match store {
                    Some((store, root)) if store.contains_frame(frame) => {
                        match store.transform(root, frame) {
                            Ok(t) => t.pose,
                            Err(err) => {
                                tracing::debug!(%frame, %err, "map frame unreachable, skipping");
                                return None;
                            }
                        }
                    }
                    _ => entry.pose,
                };
                Some(ActiveMap {
                    frame: frame.clone(),
                    data,
                    pose,
                })
            })
            .collect();
        active.sort_by(|a, b| a.frame.cmp(&b.frame));
        active
    }
}
