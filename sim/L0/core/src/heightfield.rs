//! Height-field maps for terrain contact.
//!
//! A height field is a regular grid of elevations describing a static
//! surface. The physics world keeps a registry of active maps keyed by frame
//! id (see [`crate::map`]); every collidable geometry is tested against each
//! map after being transformed into the map's local frame.
//!
//! # Coordinate System
//!
//! Map-local coordinates put the grid in the XY plane with elevations along Z:
//! - sample `(0, 0)` sits at the local origin
//! - X spans `[0, (columns - 1) * cell_size]`
//! - Y spans `[0, (rows - 1) * cell_size]`
//!
//! # Contact Convention
//!
//! The map is always the second shape of a pair: normals point out of the
//! terrain toward the query shape. Depth is the distance to the local tangent
//! plane of the terrain and is negative for speculative contacts that are
//! still within the margin.

// Grid indices are small and bounds-checked before every cast
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]

use nalgebra::{Point3, Vector3};
use rigsim_types::{Pose, SimError};

use crate::contact::{ContactManifold, ContactPoint};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Elevation grid, stored row-major (X varies fastest).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeightFieldData {
    heights: Vec<f64>,
    columns: usize,
    rows: usize,
    cell_size: f64,
    min_height: f64,
    max_height: f64,
}

impl HeightFieldData {
    /// Build a height field from `columns * rows` elevations.
    ///
    /// # Errors
    ///
    /// Fails if the data length doesn't match the dimensions, if either
    /// dimension is below 2, if the cell size is not positive, or if any
    /// elevation is not finite.
    pub fn new(
        heights: Vec<f64>,
        columns: usize,
        rows: usize,
        cell_size: f64,
    ) -> rigsim_types::Result<Self> {
        if columns < 2 || rows < 2 {
            return Err(SimError::invalid_config(
                "height field needs at least 2x2 samples",
            ));
        }
        if heights.len() != columns * rows {
            return Err(SimError::invalid_config(format!(
                "height field has {} samples, expected {columns}x{rows}",
                heights.len()
            )));
        }
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(SimError::invalid_config(
                "height field cell size must be positive",
            ));
        }
        if heights.iter().any(|h| !h.is_finite()) {
            return Err(SimError::invalid_config(
                "height field elevations must be finite",
            ));
        }

        let min_height = heights.iter().copied().fold(f64::INFINITY, f64::min);
        let max_height = heights.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            heights,
            columns,
            rows,
            cell_size,
            min_height,
            max_height,
        })
    }

    /// Flat map at constant elevation.
    pub fn flat(
        columns: usize,
        rows: usize,
        cell_size: f64,
        height: f64,
    ) -> rigsim_types::Result<Self> {
        Self::new(vec![height; columns * rows], columns, rows, cell_size)
    }

    /// Map whose elevations are `f(x, y)` at each sample's local coordinates.
    pub fn from_fn(
        columns: usize,
        rows: usize,
        cell_size: f64,
        f: impl Fn(f64, f64) -> f64,
    ) -> rigsim_types::Result<Self> {
        let heights = (0..rows)
            .flat_map(|iy| (0..columns).map(move |ix| (ix, iy)))
            .map(|(ix, iy)| f(ix as f64 * cell_size, iy as f64 * cell_size))
            .collect();
        Self::new(heights, columns, rows, cell_size)
    }

    /// Samples along X.
    #[must_use]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Samples along Y.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Spacing between samples in meters.
    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Local X extent in meters.
    #[must_use]
    pub fn extent_x(&self) -> f64 {
        (self.columns - 1) as f64 * self.cell_size
    }

    /// Local Y extent in meters.
    #[must_use]
    pub fn extent_y(&self) -> f64 {
        (self.rows - 1) as f64 * self.cell_size
    }

    /// Lowest elevation.
    #[must_use]
    pub fn min_height(&self) -> f64 {
        self.min_height
    }

    /// Highest elevation.
    #[must_use]
    pub fn max_height(&self) -> f64 {
        self.max_height
    }

    /// Elevation of grid sample `(ix, iy)`.
    #[must_use]
    pub fn height_at(&self, ix: usize, iy: usize) -> Option<f64> {
        (ix < self.columns && iy < self.rows).then(|| self.heights[iy * self.columns + ix])
    }

    /// Whether local `(x, y)` lies over the grid.
    #[must_use]
    pub fn covers(&self, x: f64, y: f64) -> bool {
        (0.0..=self.extent_x()).contains(&x) && (0.0..=self.extent_y()).contains(&y)
    }

    /// Bilinearly interpolated elevation at local `(x, y)`.
    ///
    /// Returns `None` outside the grid.
    #[must_use]
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        if !self.covers(x, y) {
            return None;
        }

        let gx = x / self.cell_size;
        let gy = y / self.cell_size;
        let x0 = (gx.floor() as usize).min(self.columns - 2);
        let y0 = (gy.floor() as usize).min(self.rows - 2);
        let fx = gx - x0 as f64;
        let fy = gy - y0 as f64;

        let at = |ix: usize, iy: usize| self.heights[iy * self.columns + ix];
        let near = at(x0, y0) + fx * (at(x0 + 1, y0) - at(x0, y0));
        let far = at(x0, y0 + 1) + fx * (at(x0 + 1, y0 + 1) - at(x0, y0 + 1));
        Some(near + fy * (far - near))
    }

    /// Elevation at the nearest covered point.
    #[must_use]
    pub fn sample_clamped(&self, x: f64, y: f64) -> f64 {
        let x = x.clamp(0.0, self.extent_x());
        let y = y.clamp(0.0, self.extent_y());
        self.sample(x, y).unwrap_or(self.min_height)
    }

    /// Upward unit normal at local `(x, y)` from central differences.
    ///
    /// Returns `None` outside the grid.
    #[must_use]
    pub fn normal(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        if !self.covers(x, y) {
            return None;
        }
        let eps = self.cell_size * 0.25;
        let dx = (self.sample_clamped(x + eps, y) - self.sample_clamped(x - eps, y)) / (2.0 * eps);
        let dy = (self.sample_clamped(x, y + eps) - self.sample_clamped(x, y - eps)) / (2.0 * eps);
        Some(Vector3::new(-dx, -dy, 1.0).normalize())
    }

    /// Normal at the nearest covered point.
    #[must_use]
    pub fn normal_clamped(&self, x: f64, y: f64) -> Vector3<f64> {
        let x = x.clamp(0.0, self.extent_x());
        let y = y.clamp(0.0, self.extent_y());
        self.normal(x, y).unwrap_or_else(Vector3::z)
    }

    /// Local bounding box `(min, max)`.
    #[must_use]
    pub fn local_bounds(&self) -> (Point3<f64>, Point3<f64>) {
        (
            Point3::new(0.0, 0.0, self.min_height),
            Point3::new(self.extent_x(), self.extent_y(), self.max_height),
        )
    }
}

/// Contact of a sphere against the map.
///
/// `center` is in world coordinates; `map_pose` places the map in the world.
/// Spheres whose center lies more than a radius outside the grid never touch.
#[must_use]
pub fn heightfield_sphere_contact(
    map: &HeightFieldData,
    map_pose: &Pose,
    center: Point3<f64>,
    radius: f64,
    margin: f64,
) -> Option<ContactPoint> {
    let local = map_pose.inverse_transform_point(&center);
    if local.x < -radius
        || local.y < -radius
        || local.x > map.extent_x() + radius
        || local.y > map.extent_y() + radius
    {
        return None;
    }

    let x = local.x.clamp(0.0, map.extent_x());
    let y = local.y.clamp(0.0, map.extent_y());
    let surface = Point3::new(x, y, map.sample_clamped(x, y));
    let normal = map.normal_clamped(x, y);

    let separation = (local - surface).dot(&normal);
    let depth = radius - separation;
    if depth <= -margin {
        return None;
    }

    let on_plane = local - normal * separation;
    Some(ContactPoint::new(
        map_pose.transform_point(&on_plane),
        map_pose.transform_vector(&normal),
        depth,
    ))
}

/// Contacts of a box's corners against the map.
///
/// Every corner over the grid that is below the surface, or within `margin`
/// above it, yields one contact.
#[must_use]
pub fn heightfield_box_contacts(
    map: &HeightFieldData,
    map_pose: &Pose,
    box_pose: &Pose,
    half_extents: &Vector3<f64>,
    margin: f64,
) -> ContactManifold {
    let mut manifold = ContactManifold::new();
    for i in 0..8 {
        let sign = |bit: usize| if i & bit == 0 { -1.0 } else { 1.0 };
        let corner = Point3::new(
            sign(1) * half_extents.x,
            sign(2) * half_extents.y,
            sign(4) * half_extents.z,
        );
        let local = map_pose.inverse_transform_point(&box_pose.transform_point(&corner));
        if let Some(contact) = point_contact(map, map_pose, &local, margin) {
            manifold.push(contact);
        }
    }
    manifold
}

/// Contacts of a capsule against the map, probed at both cap centers and at
/// the middle of the core segment.
#[must_use]
pub fn heightfield_capsule_contacts(
    map: &HeightFieldData,
    map_pose: &Pose,
    start: Point3<f64>,
    end: Point3<f64>,
    radius: f64,
    margin: f64,
) -> ContactManifold {
    [start, nalgebra::center(&start, &end), end]
        .into_iter()
        .filter_map(|c| heightfield_sphere_contact(map, map_pose, c, radius, margin))
        .collect()
}

/// Contact of a single map-local point against the surface below it.
fn point_contact(
    map: &HeightFieldData,
    map_pose: &Pose,
    local: &Point3<f64>,
    margin: f64,
) -> Option<ContactPoint> {
    let height = map.sample(local.x, local.y)?;
    let normal = map.normal_clamped(local.x, local.y);
    let depth = (height - local.z) * normal.z;
    if depth <= -margin {
        return None;
    }

    Some(ContactPoint::new(
        map_pose.transform_point(&Point3::new(local.x, local.y, height)),
        map_pose.transform_vector(&normal),
        depth,
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(HeightFieldData::new(vec![0.0; 3], 2, 2, 1.0).is_err());
        assert!(HeightFieldData::new(vec![0.0; 2], 2, 1, 1.0).is_err());
        assert!(HeightFieldData::flat(4, 4, 0.0, 0.0).is_err());
        assert!(HeightFieldData::new(vec![0.0, f64::NAN, 0.0, 0.0], 2, 2, 1.0).is_err());
    }

    #[test]
    fn test_bilinear_interpolation() {
        let map = HeightFieldData::new(vec![0.0, 2.0, 1.0, 3.0], 2, 2, 1.0).unwrap();

        assert_relative_eq!(map.sample(0.0, 0.0).unwrap(), 0.0);
        assert_relative_eq!(map.sample(1.0, 1.0).unwrap(), 3.0);
        assert_relative_eq!(map.sample(0.5, 0.5).unwrap(), 1.5);
        assert_relative_eq!(map.sample(0.5, 1.0).unwrap(), 2.0);
        assert!(map.sample(1.5, 0.5).is_none());
    }

    #[test]
    fn test_slope_normal() {
        let slope = HeightFieldData::from_fn(10, 10, 1.0, |x, _| 0.5 * x).unwrap();
        let n = slope.normal(5.0, 5.0).unwrap();
        assert_relative_eq!(n, Vector3::new(-0.5, 0.0, 1.0).normalize(), epsilon = 1e-9);

        let flat = HeightFieldData::flat(5, 5, 1.0, 0.0).unwrap();
        assert_relative_eq!(flat.normal(2.0, 2.0).unwrap(), Vector3::z());
    }

    #[test]
    fn test_sphere_contact_depth_and_normal() {
        let map = HeightFieldData::flat(10, 10, 1.0, 0.0).unwrap();
        let pose = Pose::identity();

        assert!(
            heightfield_sphere_contact(&map, &pose, Point3::new(5.0, 5.0, 2.0), 1.0, 0.0).is_none()
        );

        let c = heightfield_sphere_contact(&map, &pose, Point3::new(5.0, 5.0, 0.5), 1.0, 0.0)
            .unwrap();
        assert_relative_eq!(c.depth, 0.5, epsilon = 1e-12);
        assert_relative_eq!(c.normal, Vector3::z());
        assert_relative_eq!(c.position.z, 0.0, epsilon = 1e-12);

        assert!(
            heightfield_sphere_contact(&map, &pose, Point3::new(-5.0, 5.0, 0.0), 1.0, 0.0)
                .is_none()
        );
    }

    #[test]
    fn test_speculative_contact_within_margin() {
        let map = HeightFieldData::flat(10, 10, 1.0, 0.0).unwrap();
        let c = heightfield_sphere_contact(
            &map,
            &Pose::identity(),
            Point3::new(5.0, 5.0, 1.05),
            1.0,
            0.1,
        )
        .unwrap();
        assert_relative_eq!(c.depth, -0.05, epsilon = 1e-12);
        assert!(!c.is_penetrating());
    }

    #[test]
    fn test_resting_box_touches_with_four_corners() {
        let map = HeightFieldData::flat(10, 10, 1.0, 0.0).unwrap();
        let half = Vector3::new(0.5, 0.5, 0.5);

        let above = Pose::from_position(Point3::new(5.0, 5.0, 2.0));
        assert!(heightfield_box_contacts(&map, &Pose::identity(), &above, &half, 1e-3).is_empty());

        let sunk = Pose::from_position(Point3::new(5.0, 5.0, 0.3));
        let manifold = heightfield_box_contacts(&map, &Pose::identity(), &sunk, &half, 1e-3);
        assert_eq!(manifold.len(), 4);
        for c in &manifold {
            assert_relative_eq!(c.depth, 0.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_capsule_contacts() {
        let map = HeightFieldData::flat(10, 10, 1.0, 0.0).unwrap();
        let manifold = heightfield_capsule_contacts(
            &map,
            &Pose::identity(),
            Point3::new(3.0, 5.0, 0.3),
            Point3::new(7.0, 5.0, 0.3),
            0.5,
            0.0,
        );
        assert_eq!(manifold.len(), 3);
        assert_relative_eq!(manifold.max_depth().unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_map_pose_is_applied() {
        let map = HeightFieldData::flat(5, 5, 1.0, 0.0).unwrap();
        let raised = Pose::from_position(Point3::new(0.0, 0.0, 10.0));

        let c = heightfield_sphere_contact(&map, &raised, Point3::new(2.0, 2.0, 10.5), 1.0, 0.0)
            .unwrap();
        assert_relative_eq!(c.depth, 0.5, epsilon = 1e-12);
        assert_relative_eq!(c.position.z, 10.0, epsilon = 1e-12);
    }
}
