//! Collision shape primitives.
//!
//! Every shape is described in its own local frame; a [`Pose`] places it in
//! the world. Elongated shapes (capsule, cylinder, ray) are aligned with the
//! local Z axis.

use nalgebra::{Point3, Vector3};
use rigsim_types::{Pose, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Collision shape of a node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionShape {
    /// Sphere with given radius.
    Sphere {
        /// Sphere radius in meters.
        radius: f64,
    },
    /// Infinite plane `normal · x = distance`, in local coordinates.
    Plane {
        /// Unit normal vector of the plane.
        normal: Vector3<f64>,
        /// Distance from origin along the normal.
        distance: f64,
    },
    /// Box with half-extents along the local axes.
    Box {
        /// Half-extents of the box in each axis.
        half_extents: Vector3<f64>,
    },
    /// Cylinder with hemispherical caps along local Z.
    Capsule {
        /// Half-length of the cylindrical portion.
        half_length: f64,
        /// Radius of the capsule.
        radius: f64,
    },
    /// Flat-capped cylinder along local Z.
    Cylinder {
        /// Half-length along Z.
        half_length: f64,
        /// Radius.
        radius: f64,
    },
    /// Ray starting at the local origin and pointing along local +Z.
    ///
    /// Rays never produce constraints; they only sense distance.
    Ray {
        /// Ray length in meters.
        length: f64,
    },
}

impl CollisionShape {
    /// Create a sphere shape.
    #[must_use]
    pub fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Create a ground plane at height `height`.
    #[must_use]
    pub fn ground_plane(height: f64) -> Self {
        Self::Plane {
            normal: Vector3::z(),
            distance: height,
        }
    }

    /// Create a box shape.
    #[must_use]
    pub fn box_shape(half_extents: Vector3<f64>) -> Self {
        Self::Box { half_extents }
    }

    /// Create a capsule shape.
    #[must_use]
    pub fn capsule(half_length: f64, radius: f64) -> Self {
        Self::Capsule {
            half_length,
            radius,
        }
    }

    /// Create a cylinder shape.
    #[must_use]
    pub fn cylinder(half_length: f64, radius: f64) -> Self {
        Self::Cylinder {
            half_length,
            radius,
        }
    }

    /// Create a ray of the given length.
    #[must_use]
    pub fn ray(length: f64) -> Self {
        Self::Ray { length }
    }

    /// Whether this is a sensing ray.
    #[must_use]
    pub fn is_ray(&self) -> bool {
        matches!(self, Self::Ray { .. })
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sphere { .. } => "sphere",
            Self::Plane { .. } => "plane",
            Self::Box { .. } => "box",
            Self::Capsule { .. } => "capsule",
            Self::Cylinder { .. } => "cylinder",
            Self::Ray { .. } => "ray",
        }
    }

    /// Reject degenerate dimensions.
    pub fn validate(&self) -> rigsim_types::Result<()> {
        let positive = |name: &str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(SimError::invalid_config(format!(
                    "{} {name} must be positive and finite, got {value}",
                    self.kind()
                )))
            }
        };

        match self {
            Self::Sphere { radius } => positive("radius", *radius),
            Self::Plane { normal, distance } => {
                if normal.norm() < 1e-10 || !distance.is_finite() {
                    Err(SimError::invalid_config("plane normal must be non-zero"))
                } else {
                    Ok(())
                }
            }
            Self::Box { half_extents } => half_extents
                .iter()
                .try_for_each(|&h| positive("half extent", h)),
            Self::Capsule {
                half_length,
                radius,
            }
            | Self::Cylinder {
                half_length,
                radius,
            } => {
                positive("radius", *radius)?;
                if *half_length < 0.0 || !half_length.is_finite() {
                    return Err(SimError::invalid_config(format!(
                        "{} half length cannot be negative",
                        self.kind()
                    )));
                }
                Ok(())
            }
            Self::Ray { length } => positive("length", *length),
        }
    }

    /// World-space endpoints of a capsule's core segment.
    ///
    /// Returns `None` if this shape is not a capsule.
    #[must_use]
    pub fn capsule_endpoints(&self, pose: &Pose) -> Option<(Point3<f64>, Point3<f64>)> {
        match self {
            Self::Capsule { half_length, .. } => Some((
                pose.transform_point(&Point3::new(0.0, 0.0, -*half_length)),
                pose.transform_point(&Point3::new(0.0, 0.0, *half_length)),
            )),
            _ => None,
        }
    }

    /// Bounding radius about the local origin.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        match self {
            Self::Sphere { radius } => *radius,
            Self::Plane { .. } => f64::INFINITY,
            Self::Box { half_extents } => half_extents.norm(),
            Self::Capsule {
                half_length,
                radius,
            } => half_length + radius,
            Self::Cylinder {
                half_length,
                radius,
            } => half_length.hypot(*radius),
            Self::Ray { length } => *length,
        }
    }

    /// World-space bounding box of the shape at `pose`.
    #[must_use]
    pub fn aabb(&self, pose: &Pose) -> Aabb {
        let center = pose.position;
        match self {
            Self::Sphere { radius } => Aabb::from_center(center, Vector3::repeat(*radius)),
            Self::Plane { .. } => Aabb::everything(),
            Self::Box { half_extents } => {
                let rot = pose.rotation.to_rotation_matrix();
                let extent = rot.matrix().abs() * half_extents;
                Aabb::from_center(center, extent)
            }
            Self::Capsule {
                half_length,
                radius,
            } => {
                let axis = pose.rotation * Vector3::z() * *half_length;
                Aabb::from_center(center, axis.abs() + Vector3::repeat(*radius))
            }
            Self::Cylinder {
                half_length,
                radius,
            } => {
                let axis = pose.rotation * Vector3::z();
                let extent = axis.map(|a| a.abs() * half_length + radius * (1.0 - a * a).max(0.0).sqrt());
                Aabb::from_center(center, extent)
            }
            Self::Ray { length } => {
                let end = center + pose.rotation * Vector3::z() * *length;
                Aabb::new(center.inf(&end), center.sup(&end))
            }
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point3<f64>,
    /// Maximum corner of the bounding box.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Unbounded box, used for planes.
    #[must_use]
    pub fn everything() -> Self {
        Self {
            min: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            max: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
        }
    }

    /// Check if this AABB overlaps with another AABB.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Expand this AABB by a margin on all sides.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: self.min - Vector3::repeat(margin),
            max: self.max + Vector3::repeat(margin),
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}
