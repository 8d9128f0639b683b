//! Turning detected contacts into per-step contact joints.
//!
//! Each contact point of a pair becomes one [`ContactJoint`] carrying the
//! blended parameters of the pair, a corrected depth and the friction basis.
//! The synthesizer also reports what each geometry touched so the world can
//! fill its per-geometry bookkeeping, and hands out feedback slots for
//! geometries that asked for contact forces.

use nalgebra::{Point3, Vector3};
use rigsim_types::{BlendedContact, FrictionDirection, NodeId, SimulationConfig};

use crate::detection::{GeomView, Partner, PairContacts};
use crate::diagnostics::StepDiagnostics;
use crate::node::BodyHandle;

/// Forces a contact applied during the last step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContactFeedback {
    /// Force on the first side, world frame.
    pub force_first: Vector3<f64>,
    /// Torque on the first side about its center of mass.
    pub torque_first: Vector3<f64>,
    /// Force on the second side.
    pub force_second: Vector3<f64>,
    /// Torque on the second side about its center of mass.
    pub torque_second: Vector3<f64>,
}

/// A single-step constraint at one contact point.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContactJoint {
    pub first: Option<BodyHandle>,
    pub second: Option<BodyHandle>,
    pub position: Point3<f64>,
    /// Unit normal from the second side toward the first.
    pub normal: Vector3<f64>,
    /// Corrected penetration, never negative.
    pub depth: f64,
    /// Remaining separation for speculative contacts, never negative.
    pub gap: f64,
    pub tangents: (Vector3<f64>, Vector3<f64>),
    pub params: BlendedContact,
    pub feedback: Option<usize>,
}

/// One contact as seen by one geometry.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContactRecord {
    pub node: NodeId,
    /// The other node; `None` for maps.
    pub other: Option<NodeId>,
    pub point: Point3<f64>,
    /// Feedback slot and whether `node` is its first side.
    pub feedback: Option<(usize, bool)>,
}

/// Output of one synthesis pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct Synthesis {
    pub joints: Vec<ContactJoint>,
    pub records: Vec<ContactRecord>,
    pub feedback_slots: usize,
}

/// Builds contact joints from detected pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintSynthesizer {
    /// Points deeper than `-contact_margin` are recorded in the bookkeeping.
    pub contact_margin: f64,
}

impl ConstraintSynthesizer {
    /// Synthesizer for the given configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            contact_margin: config.contact_margin,
        }
    }

    /// Build contact joints for every pair.
    ///
    /// `senses_force` tells whether a node wants contact feedback.
    pub(crate) fn synthesize(
        &self,
        pairs: &[PairContacts],
        geoms: &[GeomView<'_>],
        senses_force: &dyn Fn(NodeId) -> bool,
        diagnostics: &mut StepDiagnostics,
    ) -> Synthesis {
        let mut out = Synthesis::default();

        for pair in pairs {
            let first = &geoms[pair.first];
            let second = match pair.partner {
                Partner::Geom(j) => Some(&geoms[j]),
                Partner::Map(_) => None,
            };
            let second_node = second.map(|g| g.node);
            let second_body = second.and_then(|g| g.body);

            let preferred = match pair.params.friction_direction {
                FrictionDirection::Default => None,
                FrictionDirection::First(d) => Some(first.pose.rotation * d),
                FrictionDirection::Second(d) => second.map(|g| g.pose.rotation * d),
                FrictionDirection::Conflict => {
                    tracing::warn!(
                        first = %first.node,
                        "both geometries set a friction direction, using the default basis"
                    );
                    diagnostics.debug(format!(
                        "friction direction conflict between {} and {}, using the default basis",
                        first.node,
                        second_node.map_or_else(|| "map".to_owned(), |n| n.to_string())
                    ));
                    None
                }
            };

            let wants_feedback =
                senses_force(first.node) || second_node.is_some_and(|n| senses_force(n));

            for point in &pair.manifold {
                let corrected = point.depth + pair.params.depth_correction;
                let feedback = wants_feedback.then(|| {
                    out.feedback_slots += 1;
                    out.feedback_slots - 1
                });

                out.joints.push(ContactJoint {
                    first: first.body,
                    second: second_body,
                    position: point.position,
                    normal: point.normal,
                    depth: corrected.max(0.0),
                    gap: (-corrected).max(0.0),
                    tangents: tangent_basis(&point.normal, preferred.as_ref()),
                    params: pair.params.clone(),
                    feedback,
                });

                if point.depth > -self.contact_margin {
                    out.records.push(ContactRecord {
                        node: first.node,
                        other: second_node,
                        point: point.position,
                        feedback: feedback.map(|slot| (slot, true)),
                    });
                    if let Some(node) = second_node {
                        out.records.push(ContactRecord {
                            node,
                            other: Some(first.node),
                            point: point.position,
                            feedback: feedback.map(|slot| (slot, false)),
                        });
                    }
                }
            }
        }

        out
    }
}

/// Orthonormal tangents for a unit normal.
///
/// A preferred direction is projected onto the tangent plane and used as the
/// first tangent; when absent or parallel to the normal a fixed basis is used.
#[must_use]
pub fn tangent_basis(
    normal: &Vector3<f64>,
    preferred: Option<&Vector3<f64>>,
) -> (Vector3<f64>, Vector3<f64>) {
    let projected = preferred
        .map(|d| d - normal * normal.dot(d))
        .filter(|t| t.norm() > 1e-9);

    let t1 = projected.map_or_else(
        || {
            let helper = if normal.x.abs() < 0.9 {
                Vector3::x()
            } else {
                Vector3::y()
            };
            normal.cross(&helper).normalize()
        },
        |t| t.normalize(),
    );
    let t2 = normal.cross(&t1);
    (t1, t2)
}
