//! Rigid groups: nodes fused into one aggregate body.
//!
//! A group is created lazily by the first merge into its id and destroyed
//! when its last member leaves. The aggregate body keeps its origin at the
//! combined center of mass; every membership change recomputes the mass and
//! re-centers the body, adjusting member offsets so that no member moves in
//! the world.

use hashbrown::HashMap;
use nalgebra::Vector3;
use rigsim_types::{GroupId, MassProperties, NodeId, Pose};

use crate::arena::Arena;
use crate::node::{BodyHandle, SimBody};

/// A member's contribution to its group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Member {
    /// The member node.
    pub node: NodeId,
    /// Mass properties about the node origin, node axes.
    pub mass: MassProperties,
    /// Node pose in the aggregate body frame.
    pub offset: Pose,
}

/// One rigid group.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeGroup {
    body: BodyHandle,
    members: Vec<Member>,
}

impl CompositeGroup {
    /// The aggregate body.
    #[must_use]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    /// Connected members.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Number of connected members.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.members.len()
    }
}

/// Whether a merge created the aggregate body or reused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReport {
    /// First member: a new body was created.
    Created,
    /// The group already had a body.
    Reused,
}

/// Result of [`CompositeBodyRegistry::merge_into_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    /// The group's aggregate body.
    pub body: BodyHandle,
    /// How the body was obtained.
    pub report: MergeReport,
}

/// Result of [`CompositeBodyRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The node was the last member; the body and group are gone.
    Destroyed(BodyHandle),
    /// Members remain; the body's mass was recomputed.
    Recomputed(BodyHandle),
    /// The node was not in any group.
    NotGrouped,
}

/// Mapping from group id to aggregate body.
#[derive(Debug, Clone, Default)]
pub struct CompositeBodyRegistry {
    groups: HashMap<GroupId, CompositeGroup>,
    membership: HashMap<NodeId, GroupId>,
}

impl CompositeBodyRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `node` to `group`.
    ///
    /// `world_pose` is where the node currently sits and `mass` its mass
    /// properties about its own origin. The first member creates the body in
    /// `bodies`; later members reuse it.
    pub fn merge_into_group(
        &mut self,
        bodies: &mut Arena<SimBody>,
        group: GroupId,
        node: NodeId,
        world_pose: Pose,
        mass: MassProperties,
    ) -> Merge {
        let existing = self
            .groups
            .get(&group)
            .map(|g| g.body)
            .filter(|&body| bodies.contains(body));

        let merge = if let Some(body) = existing {
            let body_pose = bodies.get(body).map_or(world_pose, |b| b.state.pose);
            if let Some(entry) = self.groups.get_mut(&group) {
                entry.members.push(Member {
                    node,
                    mass,
                    offset: body_pose.inverse().compose(&world_pose),
                });
            }
            Merge {
                body,
                report: MergeReport::Reused,
            }
        } else {
            let body = bodies.insert(SimBody::new(world_pose, mass));
            self.groups.insert(
                group,
                CompositeGroup {
                    body,
                    members: vec![Member {
                        node,
                        mass,
                        offset: Pose::identity(),
                    }],
                },
            );
            Merge {
                body,
                report: MergeReport::Created,
            }
        };

        self.membership.insert(node, group);
        self.recompute(bodies, group);
        tracing::debug!(%group, %node, report = ?merge.report, "merged node into group");
        merge
    }

    /// Take `node` out of its group.
    ///
    /// The last member's removal destroys the body in `bodies`.
    pub fn remove(&mut self, bodies: &mut Arena<SimBody>, node: NodeId) -> Removal {
        let Some(group) = self.membership.remove(&node) else {
            return Removal::NotGrouped;
        };
        let Some(entry) = self.groups.get_mut(&group) else {
            return Removal::NotGrouped;
        };
        entry.members.retain(|m| m.node != node);
        let body = entry.body;

        if entry.members.is_empty() {
            self.groups.remove(&group);
            bodies.remove(body);
            tracing::debug!(%group, "last member left, group destroyed");
            Removal::Destroyed(body)
        } else {
            self.recompute(bodies, group);
            Removal::Recomputed(body)
        }
    }

    /// Recompute the aggregate mass of `group` from its members and move the
    /// body origin to the combined center of mass.
    ///
    /// Running it again without a membership change leaves everything as is.
    pub fn recompute(&mut self, bodies: &mut Arena<SimBody>, group: GroupId) {
        let Some(entry) = self.groups.get_mut(&group) else {
            return;
        };
        let Some(body) = bodies.get_mut(entry.body) else {
            return;
        };

        let parts: Vec<MassProperties> = entry
            .members
            .iter()
            .map(|m| m.mass.transformed(&m.offset))
            .collect();
        let combined = MassProperties::combine(&parts);
        let shift = combined.center_of_mass;

        if shift.norm() > 0.0 {
            let world_shift = body.state.pose.rotation * shift;
            body.state.pose.position += world_shift;
            body.state.twist.linear += body.state.twist.angular.cross(&world_shift);
            for member in &mut entry.members {
                member.offset.position -= shift;
            }
        }
        body.mass = MassProperties::new(combined.mass, Vector3::zeros(), combined.inertia);
    }

    /// The group a node belongs to.
    #[must_use]
    pub fn group_of(&self, node: NodeId) -> Option<GroupId> {
        self.membership.get(&node).copied()
    }

    /// A group, if it exists.
    #[must_use]
    pub fn group(&self, group: GroupId) -> Option<&CompositeGroup> {
        self.groups.get(&group)
    }

    /// Offset of `node` in its aggregate body frame.
    #[must_use]
    pub fn member_offset(&self, node: NodeId) -> Option<Pose> {
        let group = self.groups.get(self.membership.get(&node)?)?;
        group
            .members
            .iter()
            .find(|m| m.node == node)
            .map(|m| m.offset)
    }

    /// Whether the group exists.
    #[must_use]
    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains_key(&group)
    }

    /// Number of live groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop every group without touching bodies.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.membership.clear();
    }
}
