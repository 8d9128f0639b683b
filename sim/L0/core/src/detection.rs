//! Per-step collision detection over every registered geometry.
//!
//! The [`CollisionEngine`] runs three independent passes:
//!
//! 1. rigid pairs: bounding-box pruning, pair filtering, then narrow phase
//! 2. height-field maps: each dynamic geometry against each active map
//! 3. rays: nearest hit distance for every ray sensor
//!
//! Pair filtering skips pairs that share a body, pairs of two static
//! geometries, pairs whose collision bitmasks don't overlap, and pairs whose
//! nodes are already joined by a user joint. Unsupported shape combinations
//! become `Debug` diagnostics and contribute no contacts.

use nalgebra::{Point3, UnitVector3};
use rigsim_types::{BlendedContact, ContactParameters, NodeId, Pose, SimulationConfig};

use crate::CollisionShape;
use crate::contact::ContactManifold;
use crate::diagnostics::StepDiagnostics;
use crate::heightfield::{
    heightfield_box_contacts, heightfield_capsule_contacts, heightfield_sphere_contact,
};
use crate::map::ActiveMap;
use crate::narrow_phase::{UnsupportedPair, collide};
use crate::node::BodyHandle;
use crate::raycast::{raycast_heightfield, raycast_shape};

/// A collidable geometry as seen by one detection pass.
#[derive(Debug, Clone)]
pub(crate) struct GeomView<'a> {
    pub node: NodeId,
    pub shape: &'a CollisionShape,
    pub pose: Pose,
    pub body: Option<BodyHandle>,
    pub params: &'a ContactParameters,
    /// Upper bound on the speed of any point of the geometry.
    pub speed: f64,
}

/// A ray sensor as seen by one detection pass.
#[derive(Debug, Clone)]
pub(crate) struct RayView {
    /// The sensing node; `None` for one-off queries.
    pub node: Option<NodeId>,
    pub pose: Pose,
    pub length: f64,
    pub body: Option<BodyHandle>,
    pub params: ContactParameters,
    pub exclude_geom: Option<NodeId>,
    pub exclude_body: Option<BodyHandle>,
}

/// What the first geometry of a contact pair touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Partner {
    /// Another geometry, by index into the pass's geometry slice.
    Geom(usize),
    /// A height-field map, by index into the active maps.
    Map(usize),
}

/// Contacts of one pair, ready for constraint synthesis.
#[derive(Debug, Clone)]
pub(crate) struct PairContacts {
    pub first: usize,
    pub partner: Partner,
    pub manifold: ContactManifold,
    pub params: BlendedContact,
}

/// Narrow-phase driver configured from the simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEngine {
    /// Static contact margin.
    pub contact_margin: f64,
    /// Step size the speculative margin is computed for.
    pub step_size: f64,
    /// Magnitude of gravity.
    pub gravity: f64,
}

impl CollisionEngine {
    /// Engine for the given configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            contact_margin: config.contact_margin,
            step_size: config.step_size.max(0.0),
            gravity: config.gravity.norm(),
        }
    }

    /// Distance below which a pair closing at the given speeds is reported.
    ///
    /// Covers the distance both sides can travel during one step, so that a
    /// falling body is caught before it tunnels into the surface.
    #[must_use]
    pub fn pair_margin(&self, speed_a: f64, speed_b: f64) -> f64 {
        let h = self.step_size;
        self.contact_margin + (speed_a + speed_b + self.gravity * h) * h
    }

    /// Run the pair and map passes.
    pub(crate) fn detect(
        &self,
        geoms: &[GeomView<'_>],
        maps: &[ActiveMap],
        connected: &dyn Fn(NodeId, NodeId) -> bool,
        diagnostics: &mut StepDiagnostics,
    ) -> Vec<PairContacts> {
        let mut pairs = Vec::new();

        let bounds: Vec<_> = geoms
            .iter()
            .map(|g| {
                let margin = self.pair_margin(g.speed, 0.0);
                g.shape.aabb(&g.pose).expanded(margin)
            })
            .collect();

        for i in 0..geoms.len() {
            for j in (i + 1)..geoms.len() {
                let (a, b) = (&geoms[i], &geoms[j]);
                if a.body.is_none() && b.body.is_none() {
                    continue;
                }
                if !bounds[i].overlaps(&bounds[j]) || !self.eligible(a, b, connected) {
                    continue;
                }
                let margin = self.pair_margin(a.speed, b.speed);
                if let Some(manifold) = self.collide_pair(a, b, margin, diagnostics) {
                    let params = a.params.blend(b.params);
                    pairs.push(finish(i, Partner::Geom(j), manifold, params));
                }
            }
        }

        for (i, geom) in geoms.iter().enumerate() {
            if geom.body.is_none() {
                continue;
            }
            let margin = self.pair_margin(geom.speed, 0.0);
            for (m, map) in maps.iter().enumerate() {
                if let Some(manifold) = self.collide_map(geom, map, margin, diagnostics) {
                    pairs.push(finish(i, Partner::Map(m), manifold, geom.params.alone()));
                }
            }
        }

        pairs
    }

    /// Whether `a` and `b` may touch at all.
    pub(crate) fn eligible(
        &self,
        a: &GeomView<'_>,
        b: &GeomView<'_>,
        connected: &dyn Fn(NodeId, NodeId) -> bool,
    ) -> bool {
        if a.body.is_some() && a.body == b.body {
            return false;
        }
        a.params.collides_with(b.params) && !connected(a.node, b.node)
    }

    /// Narrow phase of one geometry pair; `None` when nothing touches.
    pub(crate) fn collide_pair(
        &self,
        a: &GeomView<'_>,
        b: &GeomView<'_>,
        margin: f64,
        diagnostics: &mut StepDiagnostics,
    ) -> Option<ContactManifold> {
        match collide(a.shape, &a.pose, b.shape, &b.pose, margin) {
            Ok(manifold) => (!manifold.is_empty()).then_some(manifold),
            Err(unsupported) => {
                diagnostics.debug(format!("{unsupported} ({} vs {})", a.node, b.node));
                None
            }
        }
    }

    /// Narrow phase of one geometry against one map.
    pub(crate) fn collide_map(
        &self,
        geom: &GeomView<'_>,
        map: &ActiveMap,
        margin: f64,
        diagnostics: &mut StepDiagnostics,
    ) -> Option<ContactManifold> {
        match map_contacts(geom.shape, &geom.pose, map, margin) {
            Ok(manifold) => (!manifold.is_empty()).then_some(manifold),
            Err(unsupported) => {
                diagnostics.debug(format!("{unsupported} ({} vs map {})", geom.node, map.frame));
                None
            }
        }
    }

    /// Nearest hit of a ray sensor, or its full length when nothing is hit.
    pub(crate) fn sense(&self, ray: &RayView, geoms: &[GeomView<'_>], maps: &[ActiveMap]) -> f64 {
        let direction = UnitVector3::new_normalize(ray.pose.transform_vector(&nalgebra::Vector3::z()));
        let origin = ray.pose.position;

        let geom_hits = geoms
            .iter()
            .filter(|g| {
                Some(g.node) != ray.node
                    && Some(g.node) != ray.exclude_geom
                    && (g.body.is_none() || (g.body != ray.exclude_body && g.body != ray.body))
                    && ray.params.collides_with(g.params)
            })
            .filter_map(|g| raycast_shape(g.shape, &g.pose, origin, direction, ray.length));
        let map_hits = maps
            .iter()
            .filter_map(|m| raycast_heightfield(&m.data, &m.pose, origin, direction, ray.length));

        geom_hits
            .chain(map_hits)
            .map(|hit| hit.distance)
            .fold(ray.length, f64::min)
    }
}

fn finish(
    first: usize,
    partner: Partner,
    mut manifold: ContactManifold,
    params: BlendedContact,
) -> PairContacts {
    manifold.reduce_to(params.max_contacts);
    PairContacts {
        first,
        partner,
        manifold,
        params,
    }
}

/// Contacts of a posed shape against a map.
///
/// # Errors
///
/// Only spheres, boxes and capsules have map routines.
pub fn map_contacts(
    shape: &CollisionShape,
    pose: &Pose,
    map: &ActiveMap,
    margin: f64,
) -> Result<ContactManifold, UnsupportedPair> {
    match shape {
        CollisionShape::Sphere { radius } => {
            Ok(heightfield_sphere_contact(&map.data, &map.pose, pose.position, *radius, margin)
                .into_iter()
                .collect())
        }
        CollisionShape::Box { half_extents } => Ok(heightfield_box_contacts(
            &map.data,
            &map.pose,
            pose,
            half_extents,
            margin,
        )),
        CollisionShape::Capsule {
            half_length,
            radius,
        } => {
            let start = pose.transform_point(&Point3::new(0.0, 0.0, -*half_length));
            let end = pose.transform_point(&Point3::new(0.0, 0.0, *half_length));
            Ok(heightfield_capsule_contacts(
                &map.data, &map.pose, start, end, *radius, margin,
            ))
        }
        _ => Err(UnsupportedPair {
            first: shape.kind(),
            second: "heightfield",
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::heightfield::HeightFieldData;
    use crate::node::SimBody;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use rigsim_types::MassProperties;
    use std::sync::Arc;

    fn engine() -> CollisionEngine {
        CollisionEngine::from_config(&SimulationConfig::default().zero_gravity())
    }

    fn never(_: NodeId, _: NodeId) -> bool {
        false
    }

    fn flat_map() -> ActiveMap {
        ActiveMap {
            frame: "terrain".into(),
            data: Arc::new(HeightFieldData::flat(21, 21, 0.5, 0.0).unwrap()),
            pose: Pose::from_position(Point3::new(-5.0, -5.0, 0.0)),
        }
    }

    #[test]
    fn test_pair_filters() {
        let mut bodies = Arena::new();
        let body = bodies.insert(SimBody::new(Pose::identity(), MassProperties::point_mass(1.0)));
        let other = bodies.insert(SimBody::new(Pose::identity(), MassProperties::point_mass(1.0)));

        let sphere = CollisionShape::sphere(0.5);
        let params = ContactParameters::default();
        let masked = ContactParameters::default().with_bitmask(0x1_0000);
        let view = |node, body, params| GeomView {
            node: NodeId(node),
            shape: &sphere,
            pose: Pose::identity(),
            body,
            params,
            speed: 0.0,
        };

        let engine = engine();
        let mut diagnostics = StepDiagnostics::new();

        let same_body = [view(1, Some(body), &params), view(2, Some(body), &params)];
        assert!(engine.detect(&same_body, &[], &never, &mut diagnostics).is_empty());

        let both_static = [view(1, None, &params), view(2, None, &params)];
        assert!(engine.detect(&both_static, &[], &never, &mut diagnostics).is_empty());

        let disjoint = [view(1, Some(body), &params), view(2, Some(other), &masked)];
        assert!(engine.detect(&disjoint, &[], &never, &mut diagnostics).is_empty());

        let joined = [view(1, Some(body), &params), view(2, Some(other), &params)];
        let connected = |a: NodeId, b: NodeId| a.0 + b.0 == 3;
        assert!(engine.detect(&joined, &[], &connected, &mut diagnostics).is_empty());
        assert_eq!(engine.detect(&joined, &[], &never, &mut diagnostics).len(), 1);
    }

    #[test]
    fn test_unsupported_pairs_are_diagnosed() {
        let mut bodies = Arena::new();
        let body = bodies.insert(SimBody::new(Pose::identity(), MassProperties::point_mass(1.0)));
        let cylinder = CollisionShape::cylinder(0.5, 0.2);
        let params = ContactParameters::default();
        let geoms = [GeomView {
            node: NodeId(1),
            shape: &cylinder,
            pose: Pose::from_position(Point3::new(0.0, 0.0, 0.1)),
            body: Some(body),
            params: &params,
            speed: 0.0,
        }];

        let mut diagnostics = StepDiagnostics::new();
        let pairs = engine().detect(&geoms, &[flat_map()], &never, &mut diagnostics);
        assert!(pairs.is_empty());
        assert_eq!(diagnostics.entries().len(), 1);
        assert!(diagnostics.entries()[0].message.contains("cylinder-heightfield"));
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_map_contacts_use_geometry_parameters_and_limit() {
        let mut bodies = Arena::new();
        let body = bodies.insert(SimBody::new(Pose::identity(), MassProperties::point_mass(1.0)));
        let cube = CollisionShape::box_shape(Vector3::repeat(0.5));
        let mut params = ContactParameters::default().with_friction(0.3);
        params.max_num_contacts = 2;
        let geoms = [GeomView {
            node: NodeId(1),
            shape: &cube,
            pose: Pose::from_position(Point3::new(0.0, 0.0, 0.45)),
            body: Some(body),
            params: &params,
            speed: 0.0,
        }];

        let mut diagnostics = StepDiagnostics::new();
        let pairs = engine().detect(&geoms, &[flat_map()], &never, &mut diagnostics);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].partner, Partner::Map(0));
        assert_eq!(pairs[0].manifold.len(), 2);
        assert_relative_eq!(pairs[0].params.mu1, 0.3);
    }

    #[test]
    fn test_speculative_margin_grows_with_speed() {
        let engine = CollisionEngine::from_config(&SimulationConfig::default());
        let at_rest = engine.pair_margin(0.0, 0.0);
        assert_relative_eq!(at_rest, 1e-3 + 9.81 * 1e-4, epsilon = 1e-12);
        assert!(engine.pair_margin(4.0, 0.0) > at_rest + 0.039);
    }

    #[test]
    fn test_ray_senses_nearest_hit() {
        let floor = CollisionShape::ground_plane(0.0);
        let ball = CollisionShape::sphere(0.25);
        let params = ContactParameters::default();
        let geoms = [
            GeomView {
                node: NodeId(1),
                shape: &floor,
                pose: Pose::identity(),
                body: None,
                params: &params,
                speed: 0.0,
            },
            GeomView {
                node: NodeId(2),
                shape: &ball,
                pose: Pose::from_position(Point3::new(0.0, 0.0, 1.0)),
                body: None,
                params: &params,
                speed: 0.0,
            },
        ];
        let down = Pose::from_position_rotation(
            Point3::new(0.0, 0.0, 3.0),
            nalgebra::UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        );
        let mut ray = RayView {
            node: Some(NodeId(3)),
            pose: down,
            length: 5.0,
            body: None,
            params: params.clone(),
            exclude_geom: None,
            exclude_body: None,
        };

        let engine = engine();
        assert_relative_eq!(engine.sense(&ray, &geoms, &[]), 1.75, epsilon = 1e-9);

        ray.exclude_geom = Some(NodeId(2));
        assert_relative_eq!(engine.sense(&ray, &geoms, &[]), 3.0, epsilon = 1e-9);

        ray.length = 2.0;
        assert_relative_eq!(engine.sense(&ray, &geoms, &[]), 2.0);
    }
}
