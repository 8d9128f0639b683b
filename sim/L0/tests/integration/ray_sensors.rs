//! Ray-sensor geometry and one-off ray casts.
//!
//! A ray node senses along its local +Z axis. It never produces a contact
//! joint; its sensed value is the nearest hit distance of the last step, or
//! its length when nothing was hit.

use approx::assert_relative_eq;
use rigsim_core::{CollisionShape, NodeDescriptor, StepOutcome, WorldPhysics};
use rigsim_types::{GroupId, NodeId, Point3, Pose, SimulationConfig, UnitQuaternion, Vector3};

fn world() -> WorldPhysics {
    let world = WorldPhysics::new(SimulationConfig::default().zero_gravity());
    world.initialize().unwrap();
    world
        .create_node(NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0)).fixed())
        .unwrap();
    world
}

/// Pose looking straight down from `height`.
fn looking_down(height: f64) -> Pose {
    Pose::from_position_rotation(
        Point3::new(0.0, 0.0, height),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
    )
}

fn ray(world: &WorldPhysics, height: f64, length: f64) -> NodeId {
    world
        .create_node(
            NodeDescriptor::new("ray", CollisionShape::ray(length))
                .fixed()
                .at(looking_down(height)),
        )
        .unwrap()
}

#[test]
fn ray_senses_floor_distance() {
    let world = world();
    let sensor = ray(&world, 2.0, 5.0);
    assert_relative_eq!(world.sensed_value(sensor).unwrap(), 5.0);

    assert_eq!(world.step().unwrap(), StepOutcome::Completed { contacts: 0 });
    assert_relative_eq!(world.sensed_value(sensor).unwrap(), 2.0, epsilon = 1e-9);
    assert_eq!(world.node_collision_count(sensor).unwrap(), 0);
}

#[test]
fn ray_reports_its_length_when_nothing_is_hit() {
    let world = world();
    let sensor = ray(&world, 2.0, 1.5);
    world.step().unwrap();
    assert_relative_eq!(world.sensed_value(sensor).unwrap(), 1.5);
}

/// The ray passes through a ball without pushing it or creating a joint,
/// and reports the nearest surface.
#[test]
fn ray_never_creates_contacts() {
    let world = world();
    let sensor = ray(&world, 2.0, 5.0);
    let ball = world
        .create_node(
            NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                .at_position(Point3::new(0.0, 0.0, 0.8)),
        )
        .unwrap();

    for _ in 0..3 {
        let outcome = world.step().unwrap();
        assert_eq!(outcome, StepOutcome::Completed { contacts: 0 });
    }
    assert_relative_eq!(world.sensed_value(sensor).unwrap(), 0.7, epsilon = 1e-9);
    assert_eq!(world.node_collision_count(ball).unwrap(), 0);
    assert_relative_eq!(world.node_pose(ball).unwrap().position.z, 0.8);
}

#[test]
fn ray_skips_excluded_geometry() {
    let world = world();
    let ball = world
        .create_node(
            NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                .at_position(Point3::new(0.0, 0.0, 1.0)),
        )
        .unwrap();
    let plain = ray(&world, 2.0, 5.0);
    let excluding = world
        .create_node(
            NodeDescriptor::new("ray", CollisionShape::ray(5.0))
                .fixed()
                .at(looking_down(2.0))
                .excluding_geom(ball),
        )
        .unwrap();

    world.step().unwrap();
    assert_relative_eq!(world.sensed_value(plain).unwrap(), 0.5, epsilon = 1e-9);
    assert_relative_eq!(world.sensed_value(excluding).unwrap(), 2.0, epsilon = 1e-9);
}

/// A ray mounted in a rigid group ignores every geometry of its own body.
#[test]
fn grouped_ray_ignores_own_body() {
    let world = world();
    let group = GroupId::new(3).unwrap();
    world
        .create_node(
            NodeDescriptor::new("chassis", CollisionShape::box_shape(Vector3::repeat(0.5)))
                .at_position(Point3::new(0.0, 0.0, 1.0))
                .in_group(group),
        )
        .unwrap();
    let sensor = world
        .create_node(
            NodeDescriptor::new("lidar", CollisionShape::ray(5.0))
                .at(looking_down(1.2))
                .in_group(group),
        )
        .unwrap();

    world.step().unwrap();
    assert_relative_eq!(world.sensed_value(sensor).unwrap(), 1.2, epsilon = 1e-9);
}

#[test]
fn cast_ray_queries() {
    let world = world();
    world
        .create_node(
            NodeDescriptor::new("ball", CollisionShape::sphere(0.5))
                .at_position(Point3::new(3.0, 0.0, 1.0)),
        )
        .unwrap();

    let sideways = world
        .cast_ray(Point3::new(0.0, 0.0, 1.0), Vector3::new(10.0, 0.0, 0.0))
        .unwrap();
    assert_relative_eq!(sideways, 2.5, epsilon = 1e-9);

    let straight_down = world
        .cast_ray(Point3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, -4.0))
        .unwrap();
    assert_relative_eq!(straight_down, 1.0, epsilon = 1e-9);

    let up = world
        .cast_ray(Point3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 4.0))
        .unwrap();
    assert_relative_eq!(up, 4.0);
}
