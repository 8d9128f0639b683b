//! Contacts against height-field maps.
//!
//! A map is registered under a frame id; its pose comes from the transform
//! store when one is attached and knows the frame, and from the registration
//! pose otherwise.

use std::sync::Arc;

use approx::assert_relative_eq;
use rigsim_core::{
    CollisionShape, HeightFieldData, HeightFieldProvider, NodeDescriptor, TransformSynchronizer,
    WorldPhysics,
};
use rigsim_graph::{FrameGraph, Transform, TransformStore};
use rigsim_types::{FrameId, Point3, Pose, SimulationConfig, Vector3};

/// Penetration tolerance once a resting contact is established.
const DEPTH_TOL: f64 = 1e-3;

/// 10 m x 10 m flat map centered on the world origin at elevation zero.
fn flat_map() -> (Arc<dyn HeightFieldProvider>, Pose) {
    let data = HeightFieldData::flat(21, 21, 0.5, 0.0).expect("valid map");
    let provider: Arc<dyn HeightFieldProvider> = Arc::new(Arc::new(data));
    (provider, Pose::from_position(Point3::new(-5.0, -5.0, 0.0)))
}

/// A 1 kg box dropped from 1 m onto a flat map: once contact is made the
/// box never sinks more than `DEPTH_TOL` into the map, and it comes to rest
/// on the surface.
#[test]
fn box_drops_onto_flat_map() {
    let world = WorldPhysics::new(SimulationConfig::default());
    world.initialize().unwrap();
    let (provider, pose) = flat_map();
    world.register_map("map", provider, pose).unwrap();

    let cube = world
        .create_node(
            NodeDescriptor::new("cube", CollisionShape::box_shape(Vector3::repeat(0.5)))
                .with_mass(1.0)
                .at_position(Point3::new(0.0, 0.0, 1.0)),
        )
        .unwrap();

    let mut touched = false;
    let mut stopped_at = None;
    for i in 0..200 {
        world.step().unwrap();
        touched |= world.node_collision_count(cube).unwrap() > 0;
        if touched {
            let depth = world.get_collision_depth(cube).unwrap();
            assert!(depth <= DEPTH_TOL, "box sank {depth} into the map at step {i}");
            let vz = world.node_velocity(cube).unwrap().linear.z;
            if stopped_at.is_none() && vz > -DEPTH_TOL {
                stopped_at = Some(i);
            }
        }
    }

    assert!(touched, "the box never reached the map");
    assert!(stopped_at.is_some(), "the fall was never stopped");
    assert_relative_eq!(world.node_velocity(cube).unwrap().linear.z, 0.0, epsilon = DEPTH_TOL);
    assert_eq!(world.node_contact_ids(cube).unwrap(), vec![None; 4]);
    let rest = world.node_pose(cube).unwrap();
    assert_relative_eq!(rest.position.z, 0.5, epsilon = DEPTH_TOL);
}

/// With a store attached, the map pose is read from the store.
#[test]
fn map_pose_follows_transform_store() {
    let world = WorldPhysics::new(SimulationConfig::default().zero_gravity());
    world.initialize().unwrap();
    let (provider, _) = flat_map();
    world
        .register_map("map", provider, Pose::from_position(Point3::new(-5.0, -5.0, 0.0)))
        .unwrap();

    let graph = Arc::new(FrameGraph::new());
    graph
        .add_transform(
            &FrameId::from("world"),
            &FrameId::from("map"),
            Transform::new(Pose::from_position(Point3::new(-5.0, -5.0, -1.0))),
        )
        .unwrap();
    world
        .attach_synchronizer(graph, TransformSynchronizer::new("world"))
        .unwrap();

    // Sitting on the registration pose but one meter above the store pose.
    let high = world
        .create_node(
            NodeDescriptor::new("high", CollisionShape::sphere(0.5))
                .at_position(Point3::new(0.0, 0.0, 0.5)),
        )
        .unwrap();
    let low = world
        .create_node(
            NodeDescriptor::new("low", CollisionShape::sphere(0.5))
                .at_position(Point3::new(2.0, 0.0, -0.6)),
        )
        .unwrap();

    assert_relative_eq!(world.get_collision_depth(high).unwrap(), 0.0);
    assert_relative_eq!(world.get_collision_depth(low).unwrap(), 0.1, epsilon = 1e-9);

    world.step().unwrap();
    assert_eq!(world.node_collision_count(high).unwrap(), 0);
    assert_eq!(world.node_contact_ids(low).unwrap(), vec![None]);
}

/// Shapes without a map routine are skipped and reported, not fatal.
#[test]
fn unsupported_map_shape_is_diagnosed() {
    use std::sync::Mutex;

    use rigsim_core::{DiagnosticCallback, Severity};

    let world = WorldPhysics::new(SimulationConfig::default());
    world.initialize().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        DiagnosticCallback::new(move |d| seen.lock().unwrap().push(d.clone()))
    };
    world.set_sink(sink).unwrap();

    let (provider, pose) = flat_map();
    world.register_map("map", provider, pose).unwrap();
    let can = world
        .create_node(
            NodeDescriptor::new("can", CollisionShape::cylinder(0.5, 0.2))
                .at_position(Point3::new(0.0, 0.0, 0.4)),
        )
        .unwrap();

    assert!(world.step().unwrap().is_completed());
    assert_eq!(world.node_collision_count(can).unwrap(), 0);
    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|d| d.severity == Severity::Debug));
}
