//! Rigid-body physics engine for articulated robots.
//!
//! This crate steps a world of rigid bodies, detects their collisions with
//! each other and with height-field maps, turns contacts into one-step
//! constraints, and writes solved poses back into a hierarchical transform
//! store. It follows a node/body split where:
//!
//! - A **node** is what collaborators create: a shape, a mass and a pose
//! - A **body** is what the solver integrates; rigid groups share one body
//! - The **transform store** is the source of truth for frame poses, and is
//!   updated after every step
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorldPhysics                          │
//! │  nodes, bodies, joints, groups, maps, diagnostics           │
//! └──────┬───────────────┬──────────────────┬───────────────────┘
//!        │               │                  │
//!        ▼               ▼                  ▼
//!  CollisionEngine  ConstraintSynthesizer  TransformSynchronizer
//!  pairs + maps     contact joints         poses → store
//! ```
//!
//! One step: detect, synthesize, integrate, replace last step's contacts,
//! propagate.
//!
//! # Layer 0 Crate
//!
//! No engine or renderer dependencies. It can be used in:
//!
//! - Headless simulation loops
//! - Robot controller tests
//! - Analysis tools
//!
//! # Quick Start
//!
//! ```
//! use rigsim_core::{CollisionShape, NodeDescriptor, WorldPhysics};
//! use rigsim_types::{Point3, SimulationConfig};
//!
//! let world = WorldPhysics::new(SimulationConfig::default());
//! world.initialize()?;
//!
//! world.create_node(NodeDescriptor::new("floor", CollisionShape::ground_plane(0.0)).fixed())?;
//! let ball = world.create_node(
//!     NodeDescriptor::new("ball", CollisionShape::sphere(0.1)).at_position(Point3::new(0.0, 0.0, 0.1)),
//! )?;
//!
//! for _ in 0..100 {
//!     world.step()?;
//! }
//! assert!(world.node_pose(ball)?.position.z > 0.09);
//! # Ok::<(), rigsim_types::SimError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/rigsim-core/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,       // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,           // mul_add style changes aren't always clearer
    clippy::neg_cmp_op_on_partial_ord,  // !(x > 0.0) is intentional for NaN rejection
    clippy::option_if_let_else,         // if-let is often more readable than map_or_else
    clippy::too_many_lines,             // Physics functions naturally have many steps
    clippy::doc_markdown,               // Not all technical terms need backticks
    clippy::missing_errors_doc,         // Error docs added where non-obvious
)]

// Storage
pub mod arena;

// Geometry and narrow phase
pub mod collision_shape;
pub mod contact;
pub mod heightfield;
pub mod narrow_phase;
pub mod raycast;

// Height-field maps bound to frames
pub mod map;

// Nodes, bodies, groups and user joints
pub mod composite;
pub mod joint;
pub mod node;

// Per-step pipeline
pub mod detection;
mod solver;
pub mod synthesizer;
pub mod sync;

// Diagnostics and the world facade
pub mod diagnostics;
pub mod world;

pub use arena::{Arena, Handle};
pub use collision_shape::{Aabb, CollisionShape};
pub use composite::{
    CompositeBodyRegistry, CompositeGroup, Member, Merge, MergeReport, Removal,
};
pub use contact::{ContactManifold, ContactPoint};
pub use detection::{CollisionEngine, map_contacts};
pub use diagnostics::{Diagnostic, DiagnosticCallback, Severity, StepDiagnostics};
pub use heightfield::{
    HeightFieldData, heightfield_box_contacts, heightfield_capsule_contacts,
    heightfield_sphere_contact,
};
pub use joint::{JointDescriptor, JointKind};
pub use map::{ActiveMap, HeightFieldProvider, MapRegistry};
pub use narrow_phase::{UnsupportedPair, collide};
pub use node::{BodyHandle, GeomData, NodeDescriptor, NodeRole, SimBody};
pub use raycast::{RayHit, raycast_heightfield, raycast_shape};
pub use sync::{NodePose, PoseSource, TransformSynchronizer};
pub use synthesizer::{ConstraintSynthesizer, ContactFeedback, tangent_basis};
pub use world::{DrawItem, StepOutcome, WorldPhysics};

// Re-export the shared types for convenience
pub use rigsim_types::{
    ContactParameters, FrameId, GroupId, JointId, MassProperties, NodeId, Pose, SimError,
    SimulationConfig,
};
