//! Time-stamped rigid transforms carried on graph edges.

use rigsim_types::Pose;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A rigid transform with the simulation time it was written at.
///
/// On an edge `origin -> target`, `pose` is the pose of `target` expressed in
/// `origin`: it maps points from the target frame into the origin frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    /// The rigid transform.
    pub pose: Pose,
    /// Simulation time in seconds.
    pub time: f64,
}

impl Transform {
    /// Transform with the given pose, stamped at time zero.
    #[must_use]
    pub const fn new(pose: Pose) -> Self {
        Self { pose, time: 0.0 }
    }

    /// Transform with the given pose and time stamp.
    #[must_use]
    pub const fn stamped(pose: Pose, time: f64) -> Self {
        Self { pose, time }
    }

    /// Identity transform at time zero.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Pose::identity())
    }

    /// The transform of the reverse edge, with the same stamp.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            pose: self.pose.inverse(),
            time: self.time,
        }
    }

    /// Chain `self` (origin -> mid) with `next` (mid -> target).
    ///
    /// The result carries the newer of both stamps.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        Self {
            pose: self.pose.compose(&next.pose),
            time: self.time.max(next.time),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_then_composes_in_path_order() {
        let ra = Transform::stamped(Pose::from_position(Point3::new(1.0, 0.0, 0.0)), 1.0);
        let ab = Transform::stamped(Pose::from_position(Point3::new(0.0, 2.0, 0.0)), 2.0);

        let rb = ra.then(&ab);
        assert_relative_eq!(rb.pose.position.x, 1.0);
        assert_relative_eq!(rb.pose.position.y, 2.0);
        assert_relative_eq!(rb.time, 2.0);
    }
}
