//! Rigid groups: nodes fused into one aggregate body.

use approx::assert_relative_eq;
use rigsim_core::{CollisionShape, NodeDescriptor, WorldPhysics};
use rigsim_types::{GroupId, NodeId, Point3, SimulationConfig, Vector3};

fn world(config: SimulationConfig) -> WorldPhysics {
    let world = WorldPhysics::new(config);
    world.initialize().unwrap();
    world
}

fn member(world: &WorldPhysics, group: GroupId, x: f64, mass: f64) -> NodeId {
    world
        .create_node(
            NodeDescriptor::new(format!("part{x}"), CollisionShape::sphere(0.6))
                .with_mass(mass)
                .at_position(Point3::new(x, 0.0, 2.0))
                .in_group(group),
        )
        .unwrap()
}

/// Members keep their placement when the aggregate body is re-centered, and
/// never collide with each other.
#[test]
fn members_share_one_body() {
    let world = world(SimulationConfig::default().zero_gravity());
    let group = GroupId::new(1).unwrap();
    let a = member(&world, group, 0.0, 3.0);
    let b = member(&world, group, 1.0, 1.0);

    assert_eq!(world.node_group(a).unwrap(), Some(group));
    assert_eq!(world.group_member_count(group).unwrap(), 2);
    assert_relative_eq!(world.node_pose(a).unwrap().position.x, 0.0, epsilon = 1e-12);
    assert_relative_eq!(world.node_pose(b).unwrap().position.x, 1.0, epsilon = 1e-12);
    assert_eq!(world.check_collisions_only().unwrap(), 0);

    let com = world.get_center_of_mass(&[a, b]).unwrap();
    assert_relative_eq!(com, Vector3::new(0.25, 0.0, 2.0), epsilon = 1e-12);

    // Pushing one member moves the whole group.
    world.set_linear_velocity(b, Vector3::new(0.0, 1.0, 0.0)).unwrap();
    for _ in 0..10 {
        world.step().unwrap();
    }
    assert_relative_eq!(world.node_pose(a).unwrap().position.y, 0.1, epsilon = 1e-9);
    assert_relative_eq!(world.node_pose(b).unwrap().position.y, 0.1, epsilon = 1e-9);
    assert_relative_eq!(world.node_velocity(a).unwrap().linear.y, 1.0, epsilon = 1e-12);
}

/// A grouped body falls as one piece under gravity.
#[test]
fn group_falls_rigidly() {
    let world = world(SimulationConfig::default());
    let group = GroupId::new(2).unwrap();
    let a = member(&world, group, 0.0, 1.0);
    let b = member(&world, group, 2.0, 1.0);

    for _ in 0..20 {
        world.step().unwrap();
    }
    let pa = world.node_pose(a).unwrap().position;
    let pb = world.node_pose(b).unwrap().position;
    assert!(pa.z < 2.0);
    assert_relative_eq!(pa.z, pb.z, epsilon = 1e-9);
    assert_relative_eq!(pb.x - pa.x, 2.0, epsilon = 1e-9);
}

/// Removing members in any order ends with the group gone; removing all but
/// one leaves a working body.
#[test]
fn removal_in_any_order() {
    for order in [[0, 1, 2], [2, 0, 1], [1, 2, 0]] {
        let world = world(SimulationConfig::default().zero_gravity());
        let group = GroupId::new(5).unwrap();
        let nodes: Vec<NodeId> = (0..3)
            .map(|i| member(&world, group, f64::from(i), 1.0))
            .collect();

        world.remove_node(nodes[order[0]]).unwrap();
        world.remove_node(nodes[order[1]]).unwrap();
        assert_eq!(world.group_member_count(group).unwrap(), 1);

        let last = nodes[order[2]];
        assert_eq!(world.node_group(last).unwrap(), Some(group));
        world.set_linear_velocity(last, Vector3::x()).unwrap();
        world.step().unwrap();
        assert_relative_eq!(world.node_velocity(last).unwrap().linear.x, 1.0, epsilon = 1e-12);

        world.remove_node(last).unwrap();
        assert_eq!(world.group_member_count(group).unwrap(), 0);
        assert_eq!(world.node_count().unwrap(), 0);
    }
}

/// A group can be rebuilt under the same id after it was destroyed.
#[test]
fn group_id_is_reusable() {
    let world = world(SimulationConfig::default().zero_gravity());
    let group = GroupId::new(9).unwrap();
    let first = member(&world, group, 0.0, 1.0);
    world.remove_node(first).unwrap();

    let again = member(&world, group, 4.0, 2.0);
    assert_eq!(world.group_member_count(group).unwrap(), 1);
    assert_relative_eq!(world.node_pose(again).unwrap().position.x, 4.0, epsilon = 1e-12);
}
