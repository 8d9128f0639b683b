//! Contact geometry produced by narrow-phase collision.
//!
//! A [`ContactManifold`] is ephemeral: it is produced and consumed within one
//! step and never stored across steps.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

/// A single contact point between two shapes.
///
/// The normal points from the second shape toward the first. `depth` is the
/// penetration along the normal: positive when the shapes overlap, negative
/// for a speculative contact that is still `-depth` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Contact position in world coordinates.
    pub position: Point3<f64>,
    /// Unit normal, from the second shape toward the first.
    pub normal: Vector3<f64>,
    /// Penetration depth (negative = separated by `-depth`).
    pub depth: f64,
}

impl ContactPoint {
    /// Create a contact point.
    #[must_use]
    pub fn new(position: Point3<f64>, normal: Vector3<f64>, depth: f64) -> Self {
        Self {
            position,
            normal,
            depth,
        }
    }

    /// The same contact seen with the shapes swapped.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            position: self.position,
            normal: -self.normal,
            depth: self.depth,
        }
    }

    /// Whether the shapes actually overlap at this point.
    #[must_use]
    pub fn is_penetrating(&self) -> bool {
        self.depth >= 0.0
    }
}

/// Contact points between one pair of shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactManifold {
    points: SmallVec<[ContactPoint; 4]>,
}

impl ContactManifold {
    /// Empty manifold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifold holding a single point.
    #[must_use]
    pub fn single(point: ContactPoint) -> Self {
        let mut manifold = Self::new();
        manifold.push(point);
        manifold
    }

    /// Append a point.
    pub fn push(&mut self, point: ContactPoint) {
        self.points.push(point);
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate over the points.
    pub fn iter(&self) -> std::slice::Iter<'_, ContactPoint> {
        self.points.iter()
    }

    /// Largest depth in the manifold, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<f64> {
        self.points.iter().map(|p| p.depth).reduce(f64::max)
    }

    /// Whether any point actually penetrates.
    #[must_use]
    pub fn has_penetration(&self) -> bool {
        self.points.iter().any(ContactPoint::is_penetrating)
    }

    /// Keep at most `max` points, preferring the deepest.
    ///
    /// Points of equal depth keep their generation order.
    pub fn reduce_to(&mut self, max: usize) {
        if self.points.len() <= max {
            return;
        }
        self.points.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        self.points.truncate(max);
    }

    /// Swap the roles of the two shapes.
    #[must_use]
    pub fn flipped(mut self) -> Self {
        for p in &mut self.points {
            *p = p.flipped();
        }
        self
    }
}

impl FromIterator<ContactPoint> for ContactManifold {
    fn from_iter<I: IntoIterator<Item = ContactPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ContactManifold {
    type Item = &'a ContactPoint;
    type IntoIter = std::slice::Iter<'a, ContactPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
