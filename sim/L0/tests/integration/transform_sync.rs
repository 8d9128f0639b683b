//! Propagating solved poses into a transform store.
//!
//! The store holds a tree rooted at `world`. Nodes bound to a frame write
//! their pose into the edge joining the frame to its parent at the end of
//! every step; frames below keep their fixed offsets.

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use rigsim_core::{
    CollisionShape, DiagnosticCallback, NodeDescriptor, NodeRole, Severity, TransformSynchronizer,
    WorldPhysics,
};
use rigsim_graph::{FrameGraph, Transform, TransformStore};
use rigsim_types::{FrameId, Point3, Pose, SimError, SimulationConfig, Vector3};

struct Rig {
    world: WorldPhysics,
    graph: Arc<FrameGraph>,
    root: FrameId,
    arm: FrameId,
    tool: FrameId,
}

fn at(x: f64, y: f64, z: f64) -> Transform {
    Transform::new(Pose::from_position(Point3::new(x, y, z)))
}

/// world → arm → tool, with the arm driven by a dynamic node and the tool
/// held at a fixed offset from the arm.
fn rig() -> Rig {
    let (root, arm, tool) = (
        FrameId::from("world"),
        FrameId::from("arm"),
        FrameId::from("tool"),
    );
    let graph = Arc::new(FrameGraph::new());
    graph.add_transform(&root, &arm, at(0.0, 0.0, 1.0)).unwrap();
    graph.add_transform(&arm, &tool, at(0.5, 0.0, 0.0)).unwrap();

    let world = WorldPhysics::new(SimulationConfig::default().zero_gravity());
    world.initialize().unwrap();
    world
        .attach_synchronizer(
            Arc::clone(&graph) as Arc<dyn TransformStore>,
            TransformSynchronizer::new(root.clone()),
        )
        .unwrap();

    Rig {
        world,
        graph,
        root,
        arm,
        tool,
    }
}

#[test]
fn child_frame_follows_dynamic_parent() {
    let rig = rig();
    let node = rig
        .world
        .create_node(
            NodeDescriptor::new("arm", CollisionShape::sphere(0.1))
                .at_position(Point3::new(0.0, 0.0, 1.0))
                .bound_to(rig.arm.clone()),
        )
        .unwrap();
    rig.world
        .set_linear_velocity(node, Vector3::new(1.0, 0.0, 0.0))
        .unwrap();
    rig.world
        .set_angular_velocity(node, Vector3::new(0.0, 0.0, 1.0))
        .unwrap();

    for _ in 0..10 {
        rig.world.step().unwrap();
    }

    let arm_pose = rig.world.node_pose(node).unwrap();
    let edge = rig.graph.transform(&rig.root, &rig.arm).unwrap();
    assert_relative_eq!(edge.pose.position, arm_pose.position, epsilon = 1e-12);
    assert_relative_eq!(edge.time, rig.world.time().unwrap(), epsilon = 1e-12);

    // tool = arm ∘ (fixed arm → tool offset)
    let tool = rig.graph.transform(&rig.root, &rig.tool).unwrap();
    let expected = arm_pose.compose(&Pose::from_position(Point3::new(0.5, 0.0, 0.0)));
    assert_relative_eq!(tool.pose.position, expected.position, epsilon = 1e-9);
    assert!(tool.pose.position.y > 0.0, "tool should swing with the arm");
}

#[test]
fn derived_nodes_leave_the_store_alone() {
    let rig = rig();
    rig.world
        .create_node(
            NodeDescriptor::new("arm-visual", CollisionShape::sphere(0.1))
                .at_position(Point3::new(3.0, 0.0, 1.0))
                .with_role(NodeRole::Visual)
                .bound_to(rig.arm.clone()),
        )
        .unwrap();
    rig.world.step().unwrap();

    let edge = rig.graph.transform(&rig.root, &rig.arm).unwrap();
    assert_relative_eq!(edge.pose.position, Point3::new(0.0, 0.0, 1.0));
}

/// A cross edge is a structural error: the step fails, the driver's error
/// handler hears about it, and no edge is touched.
#[test]
fn loop_in_store_aborts_propagation() {
    let rig = rig();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let errors = Arc::clone(&errors);
        DiagnosticCallback::new(move |d| errors.lock().unwrap().push(d.severity))
    };
    rig.world.set_error_handler(handler).unwrap();

    let node = rig
        .world
        .create_node(
            NodeDescriptor::new("arm", CollisionShape::sphere(0.1))
                .at_position(Point3::new(7.0, 0.0, 1.0))
                .bound_to(rig.arm.clone()),
        )
        .unwrap();
    rig.graph
        .add_transform(&rig.root, &rig.tool, at(0.0, 0.0, 9.0))
        .unwrap();

    let err = rig.world.step().unwrap_err();
    assert!(matches!(err, SimError::StructuralLoop { .. }));
    assert!(err.is_structural());
    assert_eq!(*errors.lock().unwrap(), vec![Severity::Error]);

    let arm = rig.graph.transform(&rig.root, &rig.arm).unwrap();
    assert_relative_eq!(arm.pose.position, Point3::new(0.0, 0.0, 1.0));
    let tool = rig.graph.transform(&rig.arm, &rig.tool).unwrap();
    assert_relative_eq!(tool.pose.position, Point3::new(0.5, 0.0, 0.0));

    // Removing the cross edge heals the structure.
    rig.graph.remove_transform(&rig.root, &rig.tool).unwrap();
    rig.world.step().unwrap();
    let arm = rig.graph.transform(&rig.root, &rig.arm).unwrap();
    assert_relative_eq!(arm.pose.position, rig.world.node_pose(node).unwrap().position);
}

/// Removing a node drops its binding.
#[test]
fn removed_node_stops_driving_its_frame() {
    let rig = rig();
    let node = rig
        .world
        .create_node(
            NodeDescriptor::new("arm", CollisionShape::sphere(0.1))
                .at_position(Point3::new(2.0, 0.0, 1.0))
                .bound_to(rig.arm.clone()),
        )
        .unwrap();
    rig.world.step().unwrap();
    assert_relative_eq!(
        rig.graph.transform(&rig.root, &rig.arm).unwrap().pose.position.x,
        2.0
    );

    rig.world.remove_node(node).unwrap();
    rig.graph.update_transform(&rig.root, &rig.arm, at(0.0, 0.0, 1.0)).unwrap();
    rig.world.step().unwrap();
    assert_relative_eq!(
        rig.graph.transform(&rig.root, &rig.arm).unwrap().pose.position.x,
        0.0
    );

    let sync = rig.world.detach_synchronizer().unwrap().unwrap();
    assert_eq!(sync.binding(&rig.arm), None);
}
