//! Ray queries against collision shapes and height-field maps.
//!
//! Used by ray-sensor geometry during a step and by [`crate::WorldPhysics::cast_ray`].
//! Every query works in the shape's local frame: the ray is moved into it
//! once, tested analytically, and the hit is moved back out.

// b*b - a*c is the usual reduced discriminant, not a mistyped grouping
#![allow(clippy::suspicious_operation_groupings, clippy::similar_names)]

use nalgebra::{Point3, UnitVector3, Vector3};
use rigsim_types::Pose;

use crate::CollisionShape;
use crate::heightfield::HeightFieldData;

/// Closest intersection of a ray with a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance from the ray origin.
    pub distance: f64,
    /// Hit point in world coordinates.
    pub point: Point3<f64>,
    /// Outward surface normal at the hit point.
    pub normal: Vector3<f64>,
}

/// A ray expressed in some shape's local frame.
#[derive(Debug, Clone, Copy)]
struct LocalRay {
    origin: Point3<f64>,
    dir: Vector3<f64>,
    max: f64,
}

impl LocalRay {
    fn new(pose: &Pose, origin: Point3<f64>, dir: UnitVector3<f64>, max: f64) -> Self {
        Self {
            origin: pose.inverse_transform_point(&origin),
            dir: pose.inverse_transform_vector(dir.as_ref()),
            max,
        }
    }

    fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.dir * t
    }

    fn accepts(&self, t: f64) -> bool {
        t.is_finite() && (0.0..=self.max).contains(&t)
    }
}

/// Best local hit so far: `(t, normal)`.
#[derive(Debug, Default)]
struct Nearest(Option<(f64, Vector3<f64>)>);

impl Nearest {
    fn offer(&mut self, ray: &LocalRay, t: f64, normal: Vector3<f64>) {
        if ray.accepts(t) && self.0.is_none_or(|(best, _)| t < best) {
            self.0 = Some((t, normal));
        }
    }

    fn into_hit(self, pose: &Pose, ray: &LocalRay) -> Option<RayHit> {
        self.0.map(|(t, normal)| RayHit {
            distance: t,
            point: pose.transform_point(&ray.at(t)),
            normal: unit_or(pose.transform_vector(&normal), Vector3::z()),
        })
    }
}

fn unit_or(v: Vector3<f64>, fallback: Vector3<f64>) -> Vector3<f64> {
    let n = v.norm();
    if n > 1e-12 { v / n } else { fallback }
}

/// Cast a ray against `shape` placed at `pose`.
///
/// Returns the nearest hit within `max_distance`, or `None`. A ray starting
/// inside a solid reports the exit point. Rays never hit other rays.
#[must_use]
pub fn raycast_shape(
    shape: &CollisionShape,
    pose: &Pose,
    origin: Point3<f64>,
    direction: UnitVector3<f64>,
    max_distance: f64,
) -> Option<RayHit> {
    let ray = LocalRay::new(pose, origin, direction, max_distance);
    let mut nearest = Nearest::default();

    match shape {
        CollisionShape::Sphere { radius } => {
            sphere_hits(&ray, Point3::origin(), *radius, &mut nearest);
        }
        CollisionShape::Plane { normal, distance } => {
            let n = unit_or(*normal, Vector3::z());
            let denom = n.dot(&ray.dir);
            if denom.abs() > 1e-12 {
                let t = (distance - n.dot(&ray.origin.coords)) / denom;
                nearest.offer(&ray, t, if denom > 0.0 { -n } else { n });
            }
        }
        CollisionShape::Box { half_extents } => box_hit(&ray, half_extents, &mut nearest),
        CollisionShape::Capsule {
            half_length,
            radius,
        } => {
            side_hits(&ray, *half_length, *radius, &mut nearest);
            for z in [-*half_length, *half_length] {
                sphere_hits(&ray, Point3::new(0.0, 0.0, z), *radius, &mut nearest);
            }
        }
        CollisionShape::Cylinder {
            half_length,
            radius,
        } => {
            side_hits(&ray, *half_length, *radius, &mut nearest);
            if ray.dir.z.abs() > 1e-12 {
                for (z, n) in [(-*half_length, -Vector3::z()), (*half_length, Vector3::z())] {
                    let t = (z - ray.origin.z) / ray.dir.z;
                    let p = ray.at(t);
                    if p.x * p.x + p.y * p.y <= radius * radius {
                        nearest.offer(&ray, t, n);
                    }
                }
            }
        }
        CollisionShape::Ray { .. } => {}
    }

    nearest.into_hit(pose, &ray)
}

/// Both sphere intersections; the near one wins unless it lies behind the origin.
fn sphere_hits(ray: &LocalRay, center: Point3<f64>, radius: f64, nearest: &mut Nearest) {
    let oc = ray.origin - center;
    let a = ray.dir.norm_squared();
    let b = oc.dot(&ray.dir);
    let c = oc.norm_squared() - radius * radius;
    let disc = b * b - a * c;
    if !(disc >= 0.0) || a < 1e-24 {
        return;
    }
    let root = disc.sqrt();
    for t in [(-b - root) / a, (-b + root) / a] {
        nearest.offer(ray, t, unit_or(ray.at(t) - center, -ray.dir));
    }
}

/// Intersections with the curved side of a Z-aligned cylinder of finite height.
fn side_hits(ray: &LocalRay, half_length: f64, radius: f64, nearest: &mut Nearest) {
    let a = ray.dir.x * ray.dir.x + ray.dir.y * ray.dir.y;
    if a < 1e-24 {
        return;
    }
    let b = ray.origin.x * ray.dir.x + ray.origin.y * ray.dir.y;
    let c = ray.origin.x * ray.origin.x + ray.origin.y * ray.origin.y - radius * radius;
    let disc = b * b - a * c;
    if !(disc >= 0.0) {
        return;
    }
    let root = disc.sqrt();
    for t in [(-b - root) / a, (-b + root) / a] {
        let p = ray.at(t);
        if p.z.abs() <= half_length {
            nearest.offer(ray, t, unit_or(Vector3::new(p.x, p.y, 0.0), Vector3::x()));
        }
    }
}

/// Slab test against a box centered at the local origin.
fn box_hit(ray: &LocalRay, half: &Vector3<f64>, nearest: &mut Nearest) {
    let mut t_enter = f64::NEG_INFINITY;
    let mut t_exit = f64::INFINITY;
    let mut enter_normal = Vector3::zeros();
    let mut exit_normal = Vector3::zeros();

    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.dir[axis];
        if d.abs() < 1e-12 {
            if o.abs() > half[axis] {
                return;
            }
            continue;
        }
        let (near, far, sign) = {
            let t1 = (-half[axis] - o) / d;
            let t2 = (half[axis] - o) / d;
            if t1 < t2 { (t1, t2, -1.0) } else { (t2, t1, 1.0) }
        };
        if near > t_enter {
            t_enter = near;
            enter_normal = Vector3::zeros();
            enter_normal[axis] = sign;
        }
        if far < t_exit {
            t_exit = far;
            exit_normal = Vector3::zeros();
            exit_normal[axis] = -sign;
        }
    }

    if t_enter > t_exit {
        return;
    }
    nearest.offer(ray, t_enter, enter_normal);
    nearest.offer(ray, t_exit, exit_normal);
}

/// Cast a ray against a height-field map placed at `pose`.
///
/// Marches in half-cell steps until the ray crosses below the surface, then
/// bisects the crossing.
#[must_use]
pub fn raycast_heightfield(
    map: &HeightFieldData,
    pose: &Pose,
    origin: Point3<f64>,
    direction: UnitVector3<f64>,
    max_distance: f64,
) -> Option<RayHit> {
    let ray = LocalRay::new(pose, origin, direction, max_distance);
    let step = map.cell_size() * 0.5;
    let above = |t: f64| {
        let p = ray.at(t);
        map.sample(p.x, p.y).map(|h| p.z - h)
    };

    let mut prev: Option<(f64, f64)> = None;
    let mut t = 0.0;
    while t <= max_distance + step {
        let t_now = t.min(max_distance);
        if let Some(height) = above(t_now) {
            let crossing = prev.filter(|&(_, h_prev)| h_prev > 0.0 && height <= 0.0);
            if let Some((t_prev, _)) = crossing {
                let (mut lo, mut hi) = (t_prev, t_now);
                for _ in 0..24 {
                    let mid = 0.5 * (lo + hi);
                    match above(mid) {
                        Some(h) if h > 0.0 => lo = mid,
                        _ => hi = mid,
                    }
                }
                let p = ray.at(hi);
                let normal = map.normal_clamped(p.x, p.y);
                return Some(RayHit {
                    distance: hi,
                    point: pose.transform_point(&p),
                    normal: unit_or(pose.transform_vector(&normal), Vector3::z()),
                });
            }
            prev = Some((t_now, height));
        } else {
            prev = None;
        }
        if t_now >= max_distance {
            break;
        }
        t += step;
    }
    None
}
