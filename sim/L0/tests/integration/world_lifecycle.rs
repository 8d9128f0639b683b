//! World lifecycle, configuration and per-step bookkeeping.

use approx::assert_relative_eq;
use rigsim_core::{CollisionShape, NodeDescriptor, StepOutcome, WorldPhysics};
use rigsim_types::{ContactParameters, NodeId, Point3, SimError, SimulationConfig, Vector3};

fn world() -> WorldPhysics {
    let world = WorldPhysics::new(SimulationConfig::default());
    world.initialize().expect("initialize failed");
    world
}

fn floor(world: &WorldPhysics) -> NodeId {
    world
        .create_node(NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0)).fixed())
        .expect("floor creation failed")
}

/// Operations before `initialize()` report `NotInitialized`; stepping is a
/// no-op. After `finalize()` the same holds again.
#[test]
fn uninitialized_world_refuses_work() {
    let world = WorldPhysics::new(SimulationConfig::default());
    assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
    assert!(matches!(
        world.check_collisions_only(),
        Err(SimError::NotInitialized)
    ));

    world.initialize().unwrap();
    let ball = world
        .create_node(NodeDescriptor::new("ball", CollisionShape::sphere(0.1)))
        .unwrap();
    assert!(world.step().unwrap().is_completed());

    world.finalize().unwrap();
    assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
    assert!(matches!(world.node_pose(ball), Err(SimError::NotInitialized)));

    // A fresh world after re-initialization starts empty.
    world.initialize().unwrap();
    assert_eq!(world.node_count().unwrap(), 0);
    assert_relative_eq!(world.time().unwrap(), 0.0);
}

/// Time advances by the step size on every completed step.
#[test]
fn time_advances_per_step() {
    let world = world();
    for _ in 0..5 {
        world.step().unwrap();
    }
    assert_relative_eq!(world.time().unwrap(), 0.05, epsilon = 1e-12);

    world.set_step_size(-1.0).unwrap();
    assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
    assert_relative_eq!(world.time().unwrap(), 0.05, epsilon = 1e-12);
}

/// An invalid configuration is diagnosed and the step skipped, not failed.
#[test]
fn invalid_config_skips_step() {
    let world = world();
    let ball = world
        .create_node(NodeDescriptor::new("ball", CollisionShape::sphere(0.1)))
        .unwrap();
    world.set_erp(2.0).unwrap();
    assert_eq!(world.step().unwrap(), StepOutcome::Skipped);
    assert_relative_eq!(world.node_velocity(ball).unwrap().linear.z, 0.0);
}

/// Stepping twice without world changes leaves exactly the current contacts
/// in every geometry's bookkeeping.
#[test]
fn bookkeeping_holds_current_contacts_only() {
    let world = world();
    let floor = floor(&world);
    let half = Vector3::repeat(0.5);
    let cube = world
        .create_node(
            NodeDescriptor::new("cube", CollisionShape::box_shape(half))
                .at_position(Point3::new(0.0, 0.0, 0.5))
                .sensing_contact_force(),
        )
        .unwrap();

    for _ in 0..4 {
        world.step().unwrap();
        let count = world.node_collision_count(cube).unwrap();
        assert_eq!(count, 4, "one contact per bottom corner");
        assert_eq!(world.node_contact_ids(cube).unwrap(), vec![Some(floor); 4]);
        assert_eq!(world.node_contact_points(cube).unwrap().len(), 4);
        assert_eq!(world.node_collision_count(floor).unwrap(), 4);
    }

    // The summed feedback carries the cube's weight.
    let force = world.node_contact_force(cube).unwrap();
    assert_relative_eq!(force.z, 9.81, epsilon = 0.1);
}

/// A geometry whose bitmask doesn't overlap the floor's falls through it.
#[test]
fn bitmask_filters_contacts() {
    let world = world();
    floor(&world);
    let ghost = world
        .create_node(
            NodeDescriptor::new("ghost", CollisionShape::sphere(0.5))
                .at_position(Point3::new(0.0, 0.0, 0.5))
                .with_contact(ContactParameters::default().with_bitmask(0x1_0000)),
        )
        .unwrap();

    for _ in 0..20 {
        world.step().unwrap();
    }
    assert_eq!(world.node_collision_count(ghost).unwrap(), 0);
    assert!(world.node_pose(ghost).unwrap().position.z < 0.4);
}

/// Queries don't disturb the world.
#[test]
fn collision_queries_are_side_effect_free() {
    let world = world();
    world.set_gravity(Vector3::zeros()).unwrap();
    floor(&world);
    let ball = world
        .create_node(
            NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                .at_position(Point3::new(0.0, 0.0, 0.4)),
        )
        .unwrap();

    assert_eq!(world.check_collisions_only().unwrap(), 1);
    assert_relative_eq!(world.get_collision_depth(ball).unwrap(), 0.1, epsilon = 1e-12);
    assert_eq!(world.node_collision_count(ball).unwrap(), 0);
    assert_relative_eq!(world.node_pose(ball).unwrap().position.z, 0.4);
    assert_relative_eq!(world.time().unwrap(), 0.0);
}

/// A sliding body slows down under friction and stops.
#[test]
fn friction_stops_a_sliding_box() {
    let world = world();
    floor(&world);
    let cube = world
        .create_node(
            NodeDescriptor::new("cube", CollisionShape::box_shape(Vector3::repeat(0.5)))
                .at_position(Point3::new(0.0, 0.0, 0.5)),
        )
        .unwrap();
    world.set_linear_velocity(cube, Vector3::new(1.0, 0.0, 0.0)).unwrap();

    for _ in 0..100 {
        world.step().unwrap();
    }
    let twist = world.node_velocity(cube).unwrap();
    assert_relative_eq!(twist.linear.x, 0.0, epsilon = 1e-3);
    assert!(world.node_pose(cube).unwrap().position.x > 0.0);
}
