//! Core data types for rigid-body simulation of articulated robots.
//!
//! This crate provides the plain data shared by the physics engine and its
//! collaborators (node and joint managers, sensors, renderers):
//!
//! - [`Pose`], [`Twist`], [`RigidBodyState`] - kinematic state
//! - [`MassProperties`] - mass, center of mass, inertia, and their combination
//! - [`ContactParameters`] - per-geometry contact behavior and blending
//! - [`SimulationConfig`] - step size, gravity, softness, integrator
//! - [`NodeId`], [`JointId`], [`GroupId`], [`FrameId`] - identifiers
//!
//! # Layer 0
//!
//! This is a Layer 0 crate: no engine or renderer dependencies, only math.
//!
//! # Coordinate System
//!
//! Right-handed, Z up. Gravity defaults to `(0, 0, -9.81)`.
//!
//! # Example
//!
//! ```
//! use rigsim_types::{ContactParameters, SimulationConfig};
//!
//! let config = SimulationConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let a = ContactParameters::default();
//! let b = ContactParameters::frictionless();
//! let blended = a.blend(&b);
//! assert!((blended.mu1 - 0.4).abs() < 1e-12);
//! ```

#![doc(html_root_url = "https://docs.rs/rigsim-types/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::neg_cmp_op_on_partial_ord, // !(x > 0.0) is intentional for NaN rejection
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod contact;
mod error;
mod ids;

pub use body::{MassProperties, Pose, RigidBodyState, Twist};
pub use config::{Integrator, SimulationConfig};
pub use contact::{BlendedContact, Bounce, ContactParameters, FrictionDirection};
pub use error::SimError;
pub use ids::{FrameId, GroupId, JointId, NodeId};

pub use nalgebra::{Point3, UnitQuaternion, Vector3};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
