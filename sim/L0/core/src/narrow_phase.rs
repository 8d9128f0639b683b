//! Narrow-phase contact generation between primitive shapes.
//!
//! [`collide`] dispatches on the shape pair and returns a [`ContactManifold`]
//! whose normals point from the second shape toward the first. Pairs are
//! implemented once in a canonical order; the mirrored order reuses the same
//! routine and flips the result.
//!
//! Every routine takes a `margin`: points that are separated by less than the
//! margin are still reported, with a negative depth, so the solver can stop
//! an approaching body before it penetrates.
//!
//! Rays are not handled here. They go through [`crate::raycast`] because
//! they sense distance instead of producing constraints.

use nalgebra::{Point3, Vector3};
use rigsim_types::Pose;
use thiserror::Error;

use crate::CollisionShape;
use crate::contact::{ContactManifold, ContactPoint};

/// Below this length a direction is treated as degenerate.
const GEOM_EPSILON: f64 = 1e-10;

/// Rim samples per cylinder cap.
const CYLINDER_RIM_SAMPLES: usize = 8;

/// Shape pair with no contact routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no contact routine for {first}-{second}")]
pub struct UnsupportedPair {
    /// Kind of the first shape.
    pub first: &'static str,
    /// Kind of the second shape.
    pub second: &'static str,
}

/// Contacts between two posed shapes.
///
/// An empty manifold is the common, valid result for shapes that are apart.
///
/// # Errors
///
/// Returns [`UnsupportedPair`] for combinations without a routine. The caller
/// reports those as a diagnostic and moves on.
pub fn collide(
    a: &CollisionShape,
    pose_a: &Pose,
    b: &CollisionShape,
    pose_b: &Pose,
    margin: f64,
) -> Result<ContactManifold, UnsupportedPair> {
    use CollisionShape as S;

    let manifold = match (a, b) {
        (S::Sphere { radius: ra }, S::Sphere { radius: rb }) => {
            sphere_sphere(pose_a.position, *ra, pose_b.position, *rb, margin)
                .into_iter()
                .collect()
        }
        (S::Sphere { radius }, S::Plane { normal, distance }) => {
            let (n, d) = world_plane(pose_b, normal, *distance);
            sphere_plane(pose_a.position, *radius, &n, d, margin)
                .into_iter()
                .collect()
        }
        (S::Sphere { radius }, S::Box { half_extents }) => {
            sphere_box(pose_a.position, *radius, pose_b, half_extents, margin)
                .into_iter()
                .collect()
        }
        (S::Sphere { radius }, S::Capsule { .. }) => {
            let (s0, s1, rb) = capsule_segment(b, pose_b);
            let closest = closest_point_on_segment(&s0, &s1, &pose_a.position);
            sphere_sphere(pose_a.position, *radius, closest, rb, margin)
                .into_iter()
                .collect()
        }
        (S::Box { half_extents }, S::Plane { normal, distance }) => {
            let (n, d) = world_plane(pose_b, normal, *distance);
            box_corners(pose_a, half_extents)
                .iter()
                .filter_map(|p| point_plane(p, &n, d, margin))
                .collect()
        }
        (S::Box { half_extents: ha }, S::Box { half_extents: hb }) => {
            box_box(pose_a, ha, pose_b, hb, margin)
        }
        (S::Capsule { .. }, S::Capsule { .. }) => {
            let (a0, a1, ra) = capsule_segment(a, pose_a);
            let (b0, b1, rb) = capsule_segment(b, pose_b);
            capsule_capsule(&a0, &a1, ra, &b0, &b1, rb, margin)
        }
        (S::Capsule { .. }, S::Box { half_extents }) => {
            let (s0, s1, radius) = capsule_segment(a, pose_a);
            capsule_box(&s0, &s1, radius, pose_b, half_extents, margin)
        }
        (S::Capsule { .. }, S::Plane { normal, distance }) => {
            let (n, d) = world_plane(pose_b, normal, *distance);
            let (s0, s1, radius) = capsule_segment(a, pose_a);
            [s0, s1]
                .iter()
                .filter_map(|c| sphere_plane(*c, radius, &n, d, margin))
                .collect()
        }
        (
            S::Cylinder {
                half_length,
                radius,
            },
            S::Plane { normal, distance },
        ) => {
            let (n, d) = world_plane(pose_b, normal, *distance);
            cylinder_plane(pose_a, *half_length, *radius, &n, d, margin)
        }
        (S::Plane { .. }, S::Sphere { .. } | S::Box { .. } | S::Capsule { .. } | S::Cylinder { .. })
        | (S::Box { .. }, S::Sphere { .. })
        | (S::Capsule { .. }, S::Sphere { .. })
        | (S::Box { .. }, S::Capsule { .. }) => {
            return collide(b, pose_b, a, pose_a, margin).map(ContactManifold::flipped);
        }
        _ => {
            return Err(UnsupportedPair {
                first: a.kind(),
                second: b.kind(),
            });
        }
    };

    Ok(manifold)
}

/// World-space plane `n · x = d` of a posed plane shape.
fn world_plane(pose: &Pose, normal: &Vector3<f64>, distance: f64) -> (Vector3<f64>, f64) {
    let len = normal.norm();
    let n = pose.transform_vector(&(normal / len));
    let on_plane = pose.transform_point(&Point3::from(normal / len * distance));
    (n, n.dot(&on_plane.coords))
}

fn capsule_segment(shape: &CollisionShape, pose: &Pose) -> (Point3<f64>, Point3<f64>, f64) {
    match (shape.capsule_endpoints(pose), shape) {
        (Some((s0, s1)), CollisionShape::Capsule { radius, .. }) => (s0, s1, *radius),
        _ => (pose.position, pose.position, 0.0),
    }
}

/// Sphere `a` against sphere `b`.
fn sphere_sphere(
    ca: Point3<f64>,
    ra: f64,
    cb: Point3<f64>,
    rb: f64,
    margin: f64,
) -> Option<ContactPoint> {
    let diff = ca - cb;
    let dist = diff.norm();
    let depth = ra + rb - dist;
    if depth <= -margin {
        return None;
    }
    let normal = if dist > GEOM_EPSILON {
        diff / dist
    } else {
        Vector3::z()
    };
    Some(ContactPoint::new(
        cb + normal * (rb - 0.5 * depth),
        normal,
        depth,
    ))
}

fn sphere_plane(
    center: Point3<f64>,
    radius: f64,
    n: &Vector3<f64>,
    d: f64,
    margin: f64,
) -> Option<ContactPoint> {
    let separation = n.dot(&center.coords) - d;
    let depth = radius - separation;
    (depth > -margin).then(|| ContactPoint::new(center - n * separation, *n, depth))
}

/// A single point against a plane; the contact sits on the plane.
fn point_plane(p: &Point3<f64>, n: &Vector3<f64>, d: f64, margin: f64) -> Option<ContactPoint> {
    let depth = d - n.dot(&p.coords);
    (depth > -margin).then(|| ContactPoint::new(p + n * depth, *n, depth))
}

fn sphere_box(
    center: Point3<f64>,
    radius: f64,
    box_pose: &Pose,
    half: &Vector3<f64>,
    margin: f64,
) -> Option<ContactPoint> {
    let local = box_pose.inverse_transform_point(&center);
    let clamped = Point3::from(local.coords.zip_map(half, |c, h| c.clamp(-h, h)));
    let diff = local - clamped;
    let dist = diff.norm();

    let (normal_local, depth) = if dist > GEOM_EPSILON {
        (diff / dist, radius - dist)
    } else {
        // Center inside the box: push out through the nearest face
        let (axis, sign, gap) = nearest_face(&local, half);
        let mut n = Vector3::zeros();
        n[axis] = sign;
        (n, radius + gap)
    };

    if depth <= -margin {
        return None;
    }
    let normal = box_pose.transform_vector(&normal_local);
    let surface = box_pose.transform_point(&clamped);
    Some(ContactPoint::new(surface + normal * (0.5 * depth), normal, depth))
}

/// Face of a box closest to an interior point: `(axis, sign, distance)`.
fn nearest_face(local: &Point3<f64>, half: &Vector3<f64>) -> (usize, f64, f64) {
    let mut best = (0, 1.0, f64::INFINITY);
    for axis in 0..3 {
        for sign in [1.0, -1.0] {
            let gap = half[axis] - sign * local[axis];
            if gap < best.2 {
                best = (axis, sign, gap);
            }
        }
    }
    best
}

fn box_corners(pose: &Pose, half: &Vector3<f64>) -> [Point3<f64>; 8] {
    std::array::from_fn(|i| {
        let sign = |bit: usize| if i & bit == 0 { -1.0 } else { 1.0 };
        pose.transform_point(&Point3::new(
            sign(1) * half.x,
            sign(2) * half.y,
            sign(4) * half.z,
        ))
    })
}

fn box_axes(pose: &Pose) -> [Vector3<f64>; 3] {
    [
        pose.rotation * Vector3::x(),
        pose.rotation * Vector3::y(),
        pose.rotation * Vector3::z(),
    ]
}

/// Half-width of a box projected on `axis`.
fn projected_radius(axes: &[Vector3<f64>; 3], half: &Vector3<f64>, axis: &Vector3<f64>) -> f64 {
    (0..3).map(|i| half[i] * axes[i].dot(axis).abs()).sum()
}

/// Edge-edge axes must beat the best face axis by this fraction to be used.
const EDGE_AXIS_BIAS: f64 = 0.05;

/// Box against box.
///
/// Separating axis test over the 6 face normals and the 9 edge-edge cross
/// axes. The axis with the least overlap gives the normal and depth. For a
/// face axis, corners of each box that lie over the other box's face become
/// contacts. For an edge axis, a single contact sits at the midpoint of the
/// closest points between the two support edges.
fn box_box(
    pose_a: &Pose,
    half_a: &Vector3<f64>,
    pose_b: &Pose,
    half_b: &Vector3<f64>,
    margin: f64,
) -> ContactManifold {
    let axes_a = box_axes(pose_a);
    let axes_b = box_axes(pose_b);
    let offset = pose_a.position - pose_b.position;

    let overlap = |axis: &Vector3<f64>| {
        projected_radius(&axes_a, half_a, axis) + projected_radius(&axes_b, half_b, axis)
            - axis.dot(&offset).abs()
    };

    let mut face: Option<(f64, Vector3<f64>)> = None;
    for axis in axes_a.iter().chain(axes_b.iter()) {
        let pen = overlap(axis);
        if pen <= -margin {
            return ContactManifold::new();
        }
        if face.is_none_or(|(p, _)| pen < p) {
            face = Some((pen, *axis));
        }
    }
    let Some((face_pen, face_axis)) = face else {
        return ContactManifold::new();
    };

    let mut edge: Option<(f64, Vector3<f64>, usize, usize)> = None;
    for (i, ea) in axes_a.iter().enumerate() {
        for (j, eb) in axes_b.iter().enumerate() {
            let cross = ea.cross(eb);
            let len = cross.norm();
            if len <= GEOM_EPSILON {
                continue;
            }
            let axis = cross / len;
            let pen = overlap(&axis);
            if pen <= -margin {
                return ContactManifold::new();
            }
            if edge.is_none_or(|(p, ..)| pen < p) {
                edge = Some((pen, axis, i, j));
            }
        }
    }

    if let Some((pen, axis, i, j)) = edge {
        if pen < face_pen - EDGE_AXIS_BIAS * face_pen.abs() {
            let n = if axis.dot(&offset) < 0.0 { -axis } else { axis };
            let (a0, a1) = support_edge(pose_a, &axes_a, half_a, i, &-n);
            let (b0, b1) = support_edge(pose_b, &axes_b, half_b, j, &n);
            let (pa, pb) = closest_points_between_segments(&a0, &a1, &b0, &b1);
            let mut manifold = ContactManifold::new();
            manifold.push(ContactPoint::new(nalgebra::center(&pa, &pb), n, pen));
            return manifold;
        }
    }

    let min_pen = face_pen;
    // Normal from b toward a
    let n = if face_axis.dot(&offset) < 0.0 {
        -face_axis
    } else {
        face_axis
    };

    let ra = projected_radius(&axes_a, half_a, &n);
    let rb = projected_radius(&axes_b, half_b, &n);
    let face_b = n.dot(&pose_b.position.coords) + rb;
    let face_a = n.dot(&pose_a.position.coords) - ra;

    let mut manifold = ContactManifold::new();
    for p in box_corners(pose_a, half_a) {
        let depth = (face_b - n.dot(&p.coords)).min(min_pen);
        if depth > -margin && over_face(pose_b, half_b, &n, &p) {
            manifold.push(ContactPoint::new(p + n * (0.5 * depth), n, depth));
        }
    }
    for p in box_corners(pose_b, half_b) {
        let depth = (n.dot(&p.coords) - face_a).min(min_pen);
        if depth > -margin && over_face(pose_a, half_a, &n, &p) {
            manifold.push(ContactPoint::new(p - n * (0.5 * depth), n, depth));
        }
    }

    if manifold.is_empty() {
        let support_a = pose_a.position - n * ra;
        let support_b = pose_b.position + n * rb;
        manifold.push(ContactPoint::new(
            nalgebra::center(&support_a, &support_b),
            n,
            min_pen,
        ));
    }
    manifold
}

/// Endpoints of the box edge parallel to `axes[edge]` that reaches furthest
/// along `dir`.
fn support_edge(
    pose: &Pose,
    axes: &[Vector3<f64>; 3],
    half: &Vector3<f64>,
    edge: usize,
    dir: &Vector3<f64>,
) -> (Point3<f64>, Point3<f64>) {
    let mut mid = pose.position;
    for k in (0..3).filter(|&k| k != edge) {
        let sign = if axes[k].dot(dir) < 0.0 { -1.0 } else { 1.0 };
        mid += axes[k] * (sign * half[k]);
    }
    let along = axes[edge] * half[edge];
    (mid - along, mid + along)
}

/// Whether `p` projects onto the box face whose normal is closest to `n`.
fn over_face(pose: &Pose, half: &Vector3<f64>, n: &Vector3<f64>, p: &Point3<f64>) -> bool {
    let local = pose.inverse_transform_point(p);
    let local_n = pose.inverse_transform_vector(n);
    let face_axis = local_n.iamax();
    let slack = 1e-9;
    (0..3)
        .filter(|&i| i != face_axis)
        .all(|i| local[i].abs() <= half[i] + slack)
}

fn capsule_capsule(
    a0: &Point3<f64>,
    a1: &Point3<f64>,
    ra: f64,
    b0: &Point3<f64>,
    b1: &Point3<f64>,
    rb: f64,
    margin: f64,
) -> ContactManifold {
    let (pa, pb) = closest_points_between_segments(a0, a1, b0, b1);
    let mut manifold: ContactManifold = sphere_sphere(pa, ra, pb, rb, margin).into_iter().collect();

    // Parallel capsules lying side by side also touch at the ends
    let da = a1 - a0;
    let db = b1 - b0;
    if da.norm() > GEOM_EPSILON
        && db.norm() > GEOM_EPSILON
        && da.cross(&db).norm() < 1e-6 * da.norm() * db.norm()
    {
        for end in [a0, a1] {
            let q = closest_point_on_segment(b0, b1, end);
            if let Some(c) = sphere_sphere(*end, ra, q, rb, margin) {
                if manifold.iter().all(|m| (m.position - c.position).norm() > 1e-6) {
                    manifold.push(c);
                }
            }
        }
    }
    manifold
}

fn capsule_box(
    s0: &Point3<f64>,
    s1: &Point3<f64>,
    radius: f64,
    box_pose: &Pose,
    half: &Vector3<f64>,
    margin: f64,
) -> ContactManifold {
    // Point on the segment nearest to the box, refined from coarse samples
    let nearest = (0..=4_u8)
        .map(|i| s0 + (s1 - s0) * (f64::from(i) * 0.25))
        .map(|p| (p, distance_to_box(box_pose, half, &p)))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .map_or(*s0, |(p, _)| p);
    let surface = clamp_to_box(box_pose, half, &nearest);
    let refined = closest_point_on_segment(s0, s1, &surface);

    let mut manifold = ContactManifold::new();
    for center in [*s0, *s1, refined] {
        if let Some(c) = sphere_box(center, radius, box_pose, half, margin) {
            if manifold.iter().all(|m| (m.position - c.position).norm() > 1e-6) {
                manifold.push(c);
            }
        }
    }
    manifold
}

fn clamp_to_box(pose: &Pose, half: &Vector3<f64>, p: &Point3<f64>) -> Point3<f64> {
    let local = pose.inverse_transform_point(p);
    pose.transform_point(&Point3::from(local.coords.zip_map(half, |c, h| c.clamp(-h, h))))
}

fn distance_to_box(pose: &Pose, half: &Vector3<f64>, p: &Point3<f64>) -> f64 {
    (p - clamp_to_box(pose, half, p)).norm()
}

/// Cylinder against a plane.
///
/// Tests sample points around both cap rims plus, on each cap, the rim point
/// reaching deepest toward the plane.
fn cylinder_plane(
    pose: &Pose,
    half_length: f64,
    radius: f64,
    n: &Vector3<f64>,
    d: f64,
    margin: f64,
) -> ContactManifold {
    let axis = pose.rotation * Vector3::z();
    let radial = n - axis * n.dot(&axis);
    let toward_plane = (radial.norm() > GEOM_EPSILON).then(|| -radial.normalize());

    let mut manifold = ContactManifold::new();
    for z in [-half_length, half_length] {
        let cap = pose.transform_point(&Point3::new(0.0, 0.0, z));
        if let Some(dir) = toward_plane {
            if let Some(c) = point_plane(&(cap + dir * radius), n, d, margin) {
                manifold.push(c);
            }
        }
        for k in 0..CYLINDER_RIM_SAMPLES {
            #[allow(clippy::cast_precision_loss)]
            let angle = std::f64::consts::TAU * k as f64 / CYLINDER_RIM_SAMPLES as f64;
            let rim = pose.transform_point(&Point3::new(
                radius * angle.cos(),
                radius * angle.sin(),
                z,
            ));
            if let Some(c) = point_plane(&rim, n, d, margin) {
                manifold.push(c);
            }
        }
    }
    manifold
}

/// Closest point to `p` on segment `a`-`b`.
fn closest_point_on_segment(a: &Point3<f64>, b: &Point3<f64>, p: &Point3<f64>) -> Point3<f64> {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < GEOM_EPSILON * GEOM_EPSILON {
        return *a;
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest pair of points between segments `p0`-`p1` and `q0`-`q1`.
fn closest_points_between_segments(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    q0: &Point3<f64>,
    q1: &Point3<f64>,
) -> (Point3<f64>, Point3<f64>) {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let f = d2.dot(&r);
    let eps = GEOM_EPSILON * GEOM_EPSILON;

    if a < eps && e < eps {
        return (*p0, *q0);
    }
    if a < eps {
        return (*p0, q0 + d2 * (f / e).clamp(0.0, 1.0));
    }
    let c = d1.dot(&r);
    if e < eps {
        return (p0 + d1 * (-c / a).clamp(0.0, 1.0), *q0);
    }

    let b = d1.dot(&d2);
    let denom = a * e - b * b;
    let mut s = if denom > eps {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (p0 + d1 * s, q0 + d2 * t)
}
