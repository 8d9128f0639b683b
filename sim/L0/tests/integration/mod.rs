//! Integration tests for the rigsim crates.
//!
//! These tests drive `WorldPhysics` end to end:
//! - World lifecycle and per-step bookkeeping
//! - Resting contact on a height-field map
//! - Ray sensors and one-off ray casts
//! - Rigid groups sharing one body
//! - Pose propagation into a transform store

pub mod composite_groups;
pub mod map_contact;
pub mod ray_sensors;
pub mod transform_sync;
pub mod world_lifecycle;
