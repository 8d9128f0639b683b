//! User joints between nodes.
//!
//! Joints are created by collaborators and persist across steps, unlike the
//! contact joints rebuilt every step. Two nodes joined by a user joint are
//! "connected": contacts between them are never generated.

use nalgebra::{Point3, UnitQuaternion, Vector3};
use rigsim_types::{JointId, NodeId, Pose};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of user joint. Anchors and axes are given in world coordinates at
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointKind {
    /// Locks all relative motion.
    Fixed,
    /// Shares a point; free relative rotation.
    Ball {
        /// Shared point.
        anchor: Point3<f64>,
    },
    /// Shares a point and an axis; rotation about the axis only.
    Hinge {
        /// Shared point.
        anchor: Point3<f64>,
        /// Rotation axis.
        axis: Vector3<f64>,
    },
}

/// Request to join two nodes, or a node and the static world.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointDescriptor {
    /// Kind and geometry of the joint.
    pub kind: JointKind,
    /// First node.
    pub first: NodeId,
    /// Second node; `None` joins the first node to the world.
    pub second: Option<NodeId>,
}

impl JointDescriptor {
    /// Fixed joint between two nodes.
    #[must_use]
    pub fn fixed(first: NodeId, second: NodeId) -> Self {
        Self {
            kind: JointKind::Fixed,
            first,
            second: Some(second),
        }
    }

    /// Ball joint between two nodes.
    #[must_use]
    pub fn ball(first: NodeId, second: NodeId, anchor: Point3<f64>) -> Self {
        Self {
            kind: JointKind::Ball { anchor },
            first,
            second: Some(second),
        }
    }

    /// Hinge between two nodes.
    #[must_use]
    pub fn hinge(first: NodeId, second: NodeId, anchor: Point3<f64>, axis: Vector3<f64>) -> Self {
        Self {
            kind: JointKind::Hinge { anchor, axis },
            first,
            second: Some(second),
        }
    }

    /// Attach the first node to the world instead of a second node.
    #[must_use]
    pub fn to_world(mut self) -> Self {
        self.second = None;
        self
    }
}

/// A joint resolved against the body frames it connects.
///
/// Anchors, axes and the reference rotation are stored in the local frame of
/// each side (the world frame for a static side), so the joint follows the
/// bodies as they move.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UserJoint {
    pub id: JointId,
    pub first: NodeId,
    pub second: Option<NodeId>,
    pub kind: JointKind,
    pub anchor_first: Point3<f64>,
    pub anchor_second: Point3<f64>,
    pub axis_first: Vector3<f64>,
    pub axis_second: Vector3<f64>,
    /// Rotation of the second frame relative to the first at creation.
    pub reference: UnitQuaternion<f64>,
}

impl UserJoint {
    /// Resolve a descriptor given the current frame poses of both sides.
    pub fn new(id: JointId, desc: &JointDescriptor, first: &Pose, second: &Pose) -> Self {
        let (anchor, axis) = match desc.kind {
            JointKind::Fixed => (nalgebra::center(&first.position, &second.position), Vector3::z()),
            JointKind::Ball { anchor } => (anchor, Vector3::z()),
            JointKind::Hinge { anchor, axis } => {
                let n = axis.norm();
                (anchor, if n > 1e-12 { axis / n } else { Vector3::z() })
            }
        };
        Self {
            id,
            first: desc.first,
            second: desc.second,
            kind: desc.kind,
            anchor_first: first.inverse_transform_point(&anchor),
            anchor_second: second.inverse_transform_point(&anchor),
            axis_first: first.inverse_transform_vector(&axis),
            axis_second: second.inverse_transform_vector(&axis),
            reference: first.rotation.inverse() * second.rotation,
        }
    }

    /// Whether the joint connects `a` and `b`, in either order.
    pub fn connects(&self, a: NodeId, b: NodeId) -> bool {
        (self.first == a && self.second == Some(b)) || (self.first == b && self.second == Some(a))
    }

    /// Whether the joint involves `node`.
    pub fn involves(&self, node: NodeId) -> bool {
        self.first == node || self.second == Some(node)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_anchors_are_stored_per_side() {
        let a = Pose::from_position(Point3::new(0.0, 0.0, 1.0));
        let b = Pose::from_position(Point3::new(0.0, 0.0, 2.0));
        let desc = JointDescriptor::ball(NodeId(1), NodeId(2), Point3::new(0.0, 0.0, 1.5));
        let joint = UserJoint::new(JointId(1), &desc, &a, &b);

        assert_relative_eq!(joint.anchor_first, Point3::new(0.0, 0.0, 0.5));
        assert_relative_eq!(joint.anchor_second, Point3::new(0.0, 0.0, -0.5));
        assert!(joint.connects(NodeId(2), NodeId(1)));
        assert!(!joint.connects(NodeId(1), NodeId(3)));
    }

    #[test]
    fn test_world_joint_has_no_second_node() {
        let desc = JointDescriptor::hinge(
            NodeId(1),
            NodeId(2),
            Point3::origin(),
            Vector3::new(0.0, 2.0, 0.0),
        )
        .to_world();
        let joint = UserJoint::new(JointId(4), &desc, &Pose::identity(), &Pose::identity());
        assert_eq!(joint.second, None);
        assert!(joint.involves(NodeId(1)));
        assert!(!joint.involves(NodeId(2)));
        assert_relative_eq!(joint.axis_first, Vector3::y());
    }
}
