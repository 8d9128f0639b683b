//! Nodes, bodies and per-geometry bookkeeping.
//!
//! A node is what collaborators create: a collision shape with a mass and a
//! placement. Movable nodes are backed by a [`SimBody`]; static nodes have a
//! fixed world pose. Nodes in a rigid group share one aggregate body owned by
//! the [`crate::CompositeBodyRegistry`].

use nalgebra::{Point3, Vector3};
use rigsim_types::{
    ContactParameters, FrameId, GroupId, MassProperties, NodeId, Pose, RigidBodyState, SimError,
};

use crate::CollisionShape;
use crate::arena::Handle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle of a body in the world's body arena.
pub type BodyHandle = Handle<SimBody>;

/// What a node stands for in the robot description.
///
/// Only `Simulated` nodes write their solved pose back into the transform
/// store. The other roles are derived representations attached to a frame
/// whose pose is owned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeRole {
    /// Independently simulated body.
    #[default]
    Simulated,
    /// Inertial representation of a link.
    Inertial,
    /// Collision representation of a link.
    Collision,
    /// Visual representation of a link.
    Visual,
}

impl NodeRole {
    /// Whether the solved pose of this node is written to the store.
    #[must_use]
    pub fn writes_pose(self) -> bool {
        self == Self::Simulated
    }
}

/// Request to create a node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeDescriptor {
    /// Display name, used in diagnostics.
    pub name: String,
    /// Collision shape. A ray shape makes the node a ray sensor.
    pub shape: CollisionShape,
    /// Initial world pose.
    pub pose: Pose,
    /// Mass in kg. Ignored for static nodes.
    pub mass: f64,
    /// Explicit mass properties about the node origin, overriding the
    /// uniform-density estimate from the shape.
    pub mass_properties: Option<MassProperties>,
    /// Whether the node has a dynamic body.
    pub movable: bool,
    /// Whether the geometry takes part in collision detection.
    pub collidable: bool,
    /// Contact behavior of the geometry.
    pub contact: ContactParameters,
    /// Rigid group to fuse into.
    pub group: Option<GroupId>,
    /// Frame in the transform store that this node drives.
    pub frame: Option<FrameId>,
    /// Role of the node.
    pub role: NodeRole,
    /// Ray sensors ignore this node's geometry.
    pub exclude_geom: Option<NodeId>,
    /// Ray sensors ignore every geometry on this node's body.
    pub exclude_body: Option<NodeId>,
    /// Capture contact force feedback for this geometry.
    pub sense_contact_force: bool,
}

impl NodeDescriptor {
    /// Movable, collidable node of 1 kg at the origin.
    #[must_use]
    pub fn new(name: impl Into<String>, shape: CollisionShape) -> Self {
        Self {
            name: name.into(),
            shape,
            pose: Pose::identity(),
            mass: 1.0,
            mass_properties: None,
            movable: true,
            collidable: true,
            contact: ContactParameters::default(),
            group: None,
            frame: None,
            role: NodeRole::Simulated,
            exclude_geom: None,
            exclude_body: None,
            sense_contact_force: false,
        }
    }

    /// Place the node.
    #[must_use]
    pub fn at(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    /// Place the node at a position with identity rotation.
    #[must_use]
    pub fn at_position(mut self, position: Point3<f64>) -> Self {
        self.pose = Pose::from_position(position);
        self
    }

    /// Set the mass.
    #[must_use]
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// Set explicit mass properties.
    #[must_use]
    pub fn with_mass_properties(mut self, props: MassProperties) -> Self {
        self.mass = props.mass;
        self.mass_properties = Some(props);
        self
    }

    /// Make the node static.
    #[must_use]
    pub fn fixed(mut self) -> Self {
        self.movable = false;
        self
    }

    /// Exclude the geometry from collision detection.
    #[must_use]
    pub fn without_collision(mut self) -> Self {
        self.collidable = false;
        self
    }

    /// Set contact parameters.
    #[must_use]
    pub fn with_contact(mut self, contact: ContactParameters) -> Self {
        self.contact = contact;
        self
    }

    /// Fuse into a rigid group.
    #[must_use]
    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    /// Drive a frame of the transform store.
    #[must_use]
    pub fn bound_to(mut self, frame: impl Into<FrameId>) -> Self {
        self.frame = Some(frame.into());
        self
    }

    /// Set the role.
    #[must_use]
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Ray sensors skip the geometry of `node`.
    #[must_use]
    pub fn excluding_geom(mut self, node: NodeId) -> Self {
        self.exclude_geom = Some(node);
        self
    }

    /// Ray sensors skip every geometry on the body of `node`.
    #[must_use]
    pub fn excluding_body(mut self, node: NodeId) -> Self {
        self.exclude_body = Some(node);
        self
    }

    /// Capture contact force feedback.
    #[must_use]
    pub fn sensing_contact_force(mut self) -> Self {
        self.sense_contact_force = true;
        self
    }

    /// Mass properties about the node origin.
    ///
    /// Without an explicit override the shape is treated as a uniform solid.
    /// Capsules use the enclosing cylinder, rays and planes a point mass.
    #[must_use]
    pub fn local_mass(&self) -> MassProperties {
        if let Some(props) = self.mass_properties {
            return props;
        }
        let m = self.mass;
        match &self.shape {
            CollisionShape::Sphere { radius } => MassProperties::sphere(m, *radius),
            CollisionShape::Box { half_extents } => MassProperties::box_shape(m, *half_extents),
            CollisionShape::Cylinder {
                half_length,
                radius,
            } => MassProperties::cylinder(m, *radius, *half_length),
            CollisionShape::Capsule {
                half_length,
                radius,
            } => MassProperties::cylinder(m, *radius, half_length + radius),
            CollisionShape::Plane { .. } | CollisionShape::Ray { .. } => {
                MassProperties::point_mass(m)
            }
        }
    }

    /// Check everything needed to allocate the node.
    pub(crate) fn validate(&self) -> rigsim_types::Result<()> {
        let fail = |reason: String| SimError::allocation(&self.name, reason);

        self.shape.validate().map_err(|e| fail(e.to_string()))?;
        if !self.pose.is_finite() {
            return Err(fail("pose is not finite".into()));
        }
        if self.movable {
            if matches!(self.shape, CollisionShape::Plane { .. }) {
                return Err(fail("planes cannot be movable".into()));
            }
            self.local_mass()
                .validate()
                .map_err(|e| fail(e.to_string()))?;
        }
        Ok(())
    }
}

/// A dynamic rigid body. The body origin sits at its center of mass.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBody {
    /// Pose of the center of mass and velocities.
    pub state: RigidBodyState,
    /// Mass and inertia about the center of mass, body axes.
    pub mass: MassProperties,
    /// Force accumulated for the next step, world frame.
    pub force: Vector3<f64>,
    /// Torque accumulated for the next step, world frame.
    pub torque: Vector3<f64>,
}

impl SimBody {
    /// Body at rest at `pose`.
    #[must_use]
    pub fn new(pose: Pose, mass: MassProperties) -> Self {
        Self {
            state: RigidBodyState::at_rest(pose),
            mass,
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }

    /// Drop accumulated force and torque.
    pub fn clear_accumulators(&mut self) {
        self.force = Vector3::zeros();
        self.torque = Vector3::zeros();
    }
}

/// Per-geometry contact bookkeeping, cleared at the start of every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeomData {
    /// Contacts recorded this step.
    pub num_contacts: usize,
    /// Node on the other side of each recorded contact; `None` for maps.
    pub contact_ids: Vec<Option<NodeId>>,
    /// World position of each recorded contact.
    pub contact_points: Vec<Point3<f64>>,
    /// Feedback slots this geometry reads, with the side it sits on.
    pub feedback: Vec<(usize, bool)>,
}

impl GeomData {
    /// Forget everything recorded.
    pub fn clear(&mut self) {
        self.num_contacts = 0;
        self.contact_ids.clear();
        self.contact_points.clear();
        self.feedback.clear();
    }

    /// Record one contact.
    pub fn record(&mut self, other: Option<NodeId>, point: Point3<f64>) {
        self.num_contacts += 1;
        self.contact_ids.push(other);
        self.contact_points.push(point);
    }
}

/// A node as stored by the world.
#[derive(Debug, Clone)]
pub(crate) struct SimNode {
    pub id: NodeId,
    pub name: String,
    pub shape: CollisionShape,
    pub role: NodeRole,
    pub frame: Option<FrameId>,
    pub group: Option<GroupId>,
    /// Mass properties about the node origin.
    pub mass: MassProperties,
    /// Body carrying this node, for movable nodes.
    pub body: Option<BodyHandle>,
    /// Pose in the body frame for movable nodes, world pose otherwise.
    pub offset: Pose,
    pub collidable: bool,
    pub contact: ContactParameters,
    pub exclude_geom: Option<NodeId>,
    pub exclude_body: Option<NodeId>,
    pub sense_contact_force: bool,
    pub geom: GeomData,
    /// Ray sensors only: nearest hit distance this step.
    pub sensed: f64,
}

impl SimNode {
    pub fn is_ray(&self) -> bool {
        self.shape.is_ray()
    }

    pub fn ray_length(&self) -> f64 {
        match self.shape {
            CollisionShape::Ray { length } => length,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shape_mass_estimates() {
        let cube = NodeDescriptor::new("cube", CollisionShape::box_shape(Vector3::repeat(0.5)));
        let m = cube.local_mass();
        assert_relative_eq!(m.inertia[(0, 0)], 1.0 / 6.0, epsilon = 1e-12);

        let ray = NodeDescriptor::new("ray", CollisionShape::ray(1.0)).with_mass(0.1);
        assert_eq!(ray.local_mass().inertia, nalgebra::Matrix3::zeros());
    }

    #[test]
    fn test_validation() {
        let ok = NodeDescriptor::new("ball", CollisionShape::sphere(0.1));
        assert!(ok.validate().is_ok());

        let massless = ok.clone().with_mass(0.0);
        assert!(matches!(
            massless.validate(),
            Err(SimError::ResourceAllocation { .. })
        ));
        assert!(massless.fixed().validate().is_ok());

        let plane = NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0));
        assert!(plane.validate().is_err());
        assert!(plane.fixed().validate().is_ok());

        let degenerate = NodeDescriptor::new("dot", CollisionShape::sphere(0.0)).fixed();
        assert!(degenerate.validate().is_err());
    }

    #[test]
    fn test_bookkeeping_clear() {
        let mut geom = GeomData::default();
        geom.record(Some(NodeId(3)), Point3::origin());
        geom.feedback.push((0, true));
        assert_eq!(geom.num_contacts, 1);

        geom.clear();
        assert_eq!(geom, GeomData::default());
    }

    #[test]
    fn test_only_simulated_nodes_write_poses() {
        assert!(NodeRole::Simulated.writes_pose());
        assert!(!NodeRole::Visual.writes_pose());
        assert!(!NodeRole::Inertial.writes_pose());
    }
}
