//! Per-geometry contact parameters and the rules for blending two of them.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Contact behavior requested by one geometry.
///
/// When two geometries touch, their parameters are blended with
/// [`ContactParameters::blend`]; the result drives the constraint rows of
/// every contact point between them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactParameters {
    /// Maximum contact points generated for a pair involving this geometry.
    pub max_num_contacts: usize,
    /// Error reduction parameter (0..1).
    pub erp: f64,
    /// Constraint force mixing (softness).
    pub cfm: f64,
    /// Friction coefficient along the first tangent direction.
    pub friction1: f64,
    /// Friction coefficient along the second tangent direction.
    pub friction2: f64,
    /// Optional first friction direction, in the geometry's local frame.
    pub friction_direction1: Option<Vector3<f64>>,
    /// Surface velocity along the first friction direction.
    pub motion1: f64,
    /// Surface velocity along the second friction direction.
    pub motion2: f64,
    /// Force-dependent slip along the first friction direction.
    pub fds1: f64,
    /// Force-dependent slip along the second friction direction.
    pub fds2: f64,
    /// Restitution (0 = inelastic, 1 = perfectly elastic).
    pub bounce: f64,
    /// Minimum approach speed for restitution to apply.
    pub bounce_vel: f64,
    /// Use the pyramid (box) friction approximation instead of the elliptic cone.
    pub approx_pyramid: bool,
    /// Collision bitmask. Two geometries interact only if their masks overlap.
    pub coll_bitmask: u32,
    /// Bias added to every penetration depth reported for this geometry.
    pub depth_correction: f64,
}

impl Default for ContactParameters {
    fn default() -> Self {
        Self {
            max_num_contacts: 4,
            erp: 0.1,
            cfm: 1e-8,
            friction1: 0.8,
            friction2: 0.8,
            friction_direction1: None,
            motion1: 0.0,
            motion2: 0.0,
            fds1: 0.0,
            fds2: 0.0,
            bounce: 0.0,
            bounce_vel: 0.0,
            approx_pyramid: true,
            coll_bitmask: 0xFFFF,
            depth_correction: 0.0,
        }
    }
}

impl ContactParameters {
    /// Frictionless contact.
    #[must_use]
    pub fn frictionless() -> Self {
        Self {
            friction1: 0.0,
            friction2: 0.0,
            ..Self::default()
        }
    }

    /// Set both friction coefficients.
    #[must_use]
    pub fn with_friction(mut self, mu: f64) -> Self {
        self.friction1 = mu;
        self.friction2 = mu;
        self
    }

    /// Set restitution and the minimum approach speed it applies above.
    #[must_use]
    pub fn with_bounce(mut self, bounce: f64, bounce_vel: f64) -> Self {
        self.bounce = bounce;
        self.bounce_vel = bounce_vel;
        self
    }

    /// Set the first friction direction (local frame).
    #[must_use]
    pub fn with_friction_direction(mut self, direction: Vector3<f64>) -> Self {
        self.friction_direction1 = Some(direction);
        self
    }

    /// Set the collision bitmask.
    #[must_use]
    pub fn with_bitmask(mut self, mask: u32) -> Self {
        self.coll_bitmask = mask;
        self
    }

    /// Whether two geometries with these parameters may collide at all.
    #[must_use]
    pub fn collides_with(&self, other: &Self) -> bool {
        self.coll_bitmask & other.coll_bitmask != 0
    }

    /// Whether slip is requested along either direction.
    #[must_use]
    pub fn has_slip(&self) -> bool {
        self.fds1 > 0.0 || self.fds2 > 0.0
    }

    /// Whether surface motion is requested along either direction.
    #[must_use]
    pub fn has_motion(&self) -> bool {
        self.motion1 != 0.0 || self.motion2 != 0.0
    }

    /// Blend the parameters of two touching geometries.
    ///
    /// Every scalar output is symmetric in its arguments. The friction
    /// direction keeps track of which side supplied it, because it is
    /// expressed in that geometry's frame.
    #[must_use]
    pub fn blend(&self, other: &Self) -> BlendedContact {
        let mu1 = 0.5 * (self.friction1 + other.friction1);
        let mu2 = 0.5 * (self.friction2 + other.friction2);

        let slip = self.has_slip() || other.has_slip();
        let bounce = self.bounce > 0.0 || other.bounce > 0.0;
        let motion = self.has_motion() || other.has_motion();

        let friction_direction = match (self.friction_direction1, other.friction_direction1) {
            (None, None) => FrictionDirection::Default,
            (Some(d), None) => FrictionDirection::First(d),
            (None, Some(d)) => FrictionDirection::Second(d),
            (Some(_), Some(_)) => FrictionDirection::Conflict,
        };

        BlendedContact {
            erp: 0.5 * (self.erp + other.erp),
            cfm: 0.5 * (self.cfm + other.cfm),
            mu1,
            mu2,
            secondary_friction: mu1 != mu2,
            approx_pyramid: self.approx_pyramid || other.approx_pyramid,
            slip: slip.then_some((self.fds1 + other.fds1, self.fds2 + other.fds2)),
            bounce: bounce.then(|| Bounce {
                restitution: (self.bounce + other.bounce).min(1.0),
                threshold: self.bounce_vel.max(other.bounce_vel),
            }),
            motion: motion.then_some((self.motion1 + other.motion1, self.motion2 + other.motion2)),
            friction_direction,
            depth_correction: self.depth_correction + other.depth_correction,
            max_contacts: self.max_num_contacts.min(other.max_num_contacts),
        }
    }

    /// Parameters of a geometry touching a map: the map contributes nothing,
    /// so this geometry's values are used unmodified.
    #[must_use]
    pub fn alone(&self) -> BlendedContact {
        BlendedContact {
            erp: self.erp,
            cfm: self.cfm,
            mu1: self.friction1,
            mu2: self.friction2,
            secondary_friction: self.friction1 != self.friction2,
            approx_pyramid: self.approx_pyramid,
            slip: self.has_slip().then_some((self.fds1, self.fds2)),
            bounce: (self.bounce > 0.0).then(|| Bounce {
                restitution: self.bounce.min(1.0),
                threshold: self.bounce_vel,
            }),
            motion: self.has_motion().then_some((self.motion1, self.motion2)),
            friction_direction: self
                .friction_direction1
                .map_or(FrictionDirection::Default, FrictionDirection::First),
            depth_correction: self.depth_correction,
            max_contacts: self.max_num_contacts,
        }
    }
}

/// Restitution settings of a blended contact.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounce {
    /// Sum of both restitution coefficients, capped at 1.
    pub restitution: f64,
    /// Larger of both minimum approach speeds.
    pub threshold: f64,
}

/// Origin of the first friction direction of a blended contact.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrictionDirection {
    /// Neither geometry specifies one; the solver picks a tangent basis.
    Default,
    /// The first geometry's direction, in its local frame.
    First(Vector3<f64>),
    /// The second geometry's direction, in its local frame.
    Second(Vector3<f64>),
    /// Both geometries specify one. This combination is not resolved.
    Conflict,
}

/// Result of blending two geometries' contact parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlendedContact {
    /// Mean error reduction parameter.
    pub erp: f64,
    /// Mean constraint force mixing.
    pub cfm: f64,
    /// Mean friction along the first direction.
    pub mu1: f64,
    /// Mean friction along the second direction.
    pub mu2: f64,
    /// Set when `mu1 != mu2`; the second direction then uses `mu2`.
    pub secondary_friction: bool,
    /// Pyramid friction approximation.
    pub approx_pyramid: bool,
    /// Summed slip per direction, when either side requests slip.
    pub slip: Option<(f64, f64)>,
    /// Restitution, when either side requests it.
    pub bounce: Option<Bounce>,
    /// Summed surface velocity per direction, when either side requests it.
    pub motion: Option<(f64, f64)>,
    /// First friction direction override.
    pub friction_direction: FrictionDirection,
    /// Summed depth correction bias.
    pub depth_correction: f64,
    /// Most restrictive maximum contact count.
    pub max_contacts: usize,
}

impl BlendedContact {
    /// Friction coefficient actually used along the second direction.
    #[must_use]
    pub fn effective_mu2(&self) -> f64 {
        if self.secondary_friction {
            self.mu2
        } else {
            self.mu1
        }
    }

    /// Apply the depth correction and clamp to a non-negative depth.
    #[must_use]
    pub fn corrected_depth(&self, depth: f64) -> f64 {
        (depth + self.depth_correction).max(0.0)
    }
}
