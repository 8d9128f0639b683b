//! Velocity-level constraint solver and integrator.
//!
//! One step runs:
//!
//! 1. apply gravity and accumulated forces to the velocities
//! 2. projected Gauss-Seidel over user joint and contact rows
//! 3. integrate positions and orientations with the constrained velocities
//!
//! Rows are impulse rows `J·v = target` with softness `γ = cfm / h`. Contact
//! normals are bounded below by zero, friction rows by the normal impulse
//! (pyramid) or jointly by the friction ellipse.

use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
use rigsim_types::{Integrator, Pose, SimError, SimulationConfig};

use crate::arena::Arena;
use crate::joint::{JointKind, UserJoint};
use crate::node::{BodyHandle, SimBody};
use crate::synthesizer::{ContactFeedback, ContactJoint};

/// One side of a user joint, resolved for this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct JointSide {
    pub body: Option<BodyHandle>,
    /// Node pose in the body frame, or the world pose for a static side.
    pub offset: Pose,
}

/// A user joint with both sides resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JointInput<'a> {
    pub joint: &'a UserJoint,
    pub first: JointSide,
    pub second: JointSide,
}

#[derive(Debug, Clone)]
struct SolverBody {
    handle: BodyHandle,
    position: Point3<f64>,
    rotation: UnitQuaternion<f64>,
    inv_mass: f64,
    inv_inertia: Matrix3<f64>,
    linear: Vector3<f64>,
    angular: Vector3<f64>,
}

#[derive(Debug, Clone, Default)]
struct Row {
    a: Option<usize>,
    b: Option<usize>,
    lin_a: Vector3<f64>,
    ang_a: Vector3<f64>,
    lin_b: Vector3<f64>,
    ang_b: Vector3<f64>,
    target: f64,
    gamma: f64,
    inv_k: f64,
    lambda: f64,
}

impl Row {
    fn new(
        a: Option<usize>,
        b: Option<usize>,
        lin: Vector3<f64>,
        ang_a: Vector3<f64>,
        ang_b: Vector3<f64>,
    ) -> Self {
        Self {
            a,
            b,
            lin_a: lin,
            ang_a,
            lin_b: -lin,
            ang_b,
            ..Self::default()
        }
    }

    /// Angular-only row: `(ω_a - ω_b)·axis`.
    fn angular(a: Option<usize>, b: Option<usize>, axis: Vector3<f64>) -> Self {
        Self::new(a, b, Vector3::zeros(), axis, -axis)
    }

    fn prepare(&mut self, bodies: &[SolverBody], target: f64, gamma: f64) {
        let mut k = gamma;
        if let Some(a) = self.a {
            let body = &bodies[a];
            k += body.inv_mass * self.lin_a.norm_squared()
                + self.ang_a.dot(&(body.inv_inertia * self.ang_a));
        }
        if let Some(b) = self.b {
            let body = &bodies[b];
            k += body.inv_mass * self.lin_b.norm_squared()
                + self.ang_b.dot(&(body.inv_inertia * self.ang_b));
        }
        self.target = target;
        self.gamma = gamma;
        self.inv_k = if k > 1e-15 { 1.0 / k } else { 0.0 };
    }

    fn velocity(&self, bodies: &[SolverBody]) -> f64 {
        let mut jv = 0.0;
        if let Some(a) = self.a {
            jv += self.lin_a.dot(&bodies[a].linear) + self.ang_a.dot(&bodies[a].angular);
        }
        if let Some(b) = self.b {
            jv += self.lin_b.dot(&bodies[b].linear) + self.ang_b.dot(&bodies[b].angular);
        }
        jv
    }

    /// Unclamped impulse change.
    fn delta(&self, bodies: &[SolverBody]) -> f64 {
        (self.target - self.velocity(bodies) - self.gamma * self.lambda) * self.inv_k
    }

    fn apply(&self, bodies: &mut [SolverBody], impulse: f64) {
        if let Some(a) = self.a {
            let body = &mut bodies[a];
            body.linear += self.lin_a * (body.inv_mass * impulse);
            body.angular += body.inv_inertia * self.ang_a * impulse;
        }
        if let Some(b) = self.b {
            let body = &mut bodies[b];
            body.linear += self.lin_b * (body.inv_mass * impulse);
            body.angular += body.inv_inertia * self.ang_b * impulse;
        }
    }

    /// Move `lambda` to `new` and push the change into the velocities.
    fn commit(&mut self, bodies: &mut [SolverBody], new: f64) -> f64 {
        let change = new - self.lambda;
        self.lambda = new;
        self.apply(bodies, change);
        change.abs()
    }
}

#[derive(Debug, Clone)]
struct ContactBlock {
    normal: Row,
    t1: Row,
    t2: Row,
    mu1: f64,
    mu2: f64,
    pyramid: bool,
    r_a: Vector3<f64>,
    r_b: Vector3<f64>,
    basis: [Vector3<f64>; 3],
    feedback: Option<usize>,
}

impl ContactBlock {
    fn solve(&mut self, bodies: &mut [SolverBody]) -> f64 {
        let dn = self.normal.delta(bodies);
        let lambda_n = (self.normal.lambda + dn).max(0.0);
        let mut change = self.normal.commit(bodies, lambda_n);

        let l1 = self.t1.lambda + self.t1.delta(bodies);
        let l2 = self.t2.lambda + self.t2.delta(bodies);
        let (l1, l2) = if self.pyramid {
            let b1 = self.mu1 * lambda_n;
            let b2 = self.mu2 * lambda_n;
            (l1.clamp(-b1, b1), l2.clamp(-b2, b2))
        } else {
            project_ellipse(l1, l2, self.mu1 * lambda_n, self.mu2 * lambda_n)
        };
        change = change.max(self.t1.commit(bodies, l1));
        change.max(self.t2.commit(bodies, l2))
    }

    fn feedback(&self, h: f64) -> ContactFeedback {
        let [n, t1, t2] = self.basis;
        let force = (n * self.normal.lambda + t1 * self.t1.lambda + t2 * self.t2.lambda) / h;
        ContactFeedback {
            force_first: force,
            torque_first: self.r_a.cross(&force),
            force_second: -force,
            torque_second: self.r_b.cross(&-force),
        }
    }
}

/// Scale `(l1, l2)` into the ellipse with semi-axes `(a1, a2)`.
fn project_ellipse(l1: f64, l2: f64, a1: f64, a2: f64) -> (f64, f64) {
    if a1 <= 0.0 && a2 <= 0.0 {
        return (0.0, 0.0);
    }
    if a1 <= 0.0 {
        return (0.0, l2.clamp(-a2, a2));
    }
    if a2 <= 0.0 {
        return (l1.clamp(-a1, a1), 0.0);
    }
    let s = ((l1 / a1).powi(2) + (l2 / a2).powi(2)).sqrt();
    if s > 1.0 { (l1 / s, l2 / s) } else { (l1, l2) }
}

/// Advance every body by one step under the given constraints.
///
/// Returns contact feedback for `feedback_slots` slots. On a non-finite
/// result no pose or velocity is modified, and every body's accumulated
/// force and torque is dropped so the next step starts clean.
pub(crate) fn step(
    config: &SimulationConfig,
    bodies: &mut Arena<SimBody>,
    joints: &[JointInput<'_>],
    contacts: &[ContactJoint],
    feedback_slots: usize,
) -> rigsim_types::Result<Vec<ContactFeedback>> {
    let h = config.step_size;

    let mut dense: Vec<Option<usize>> = vec![None; bodies.capacity()];
    let mut solver_bodies = Vec::with_capacity(bodies.len());
    for (handle, body) in bodies.iter() {
        let rot = body.state.pose.rotation.to_rotation_matrix();
        let inv_inertia = rot.matrix() * body.mass.inverse_inertia() * rot.matrix().transpose();
        let inv_mass = body.mass.inverse_mass();
        dense[handle.index()] = Some(solver_bodies.len());
        solver_bodies.push(SolverBody {
            handle,
            position: body.state.pose.position,
            rotation: body.state.pose.rotation,
            inv_mass,
            inv_inertia,
            linear: body.state.twist.linear,
            angular: body.state.twist.angular,
        });
    }
    let index = |handle: Option<BodyHandle>| handle.and_then(|b| dense[b.index()]);

    let mut blocks = build_contacts(contacts, &solver_bodies, &index, h);

    for (sb, (_, body)) in solver_bodies.iter_mut().zip(bodies.iter()) {
        if sb.inv_mass > 0.0 {
            sb.linear += (config.gravity + body.force * sb.inv_mass) * h;
        }
        sb.angular += sb.inv_inertia * body.torque * h;
    }

    let mut rows = build_joints(config, joints, &solver_bodies, &index, h, bodies);

    let sweeps = match config.integrator {
        Integrator::Quick => config.solver_iterations,
        Integrator::Accurate => config.accurate_max_iterations,
    };
    for sweep in 0..sweeps {
        let mut largest: f64 = 0.0;
        for row in &mut rows {
            let next = row.lambda + row.delta(&solver_bodies);
            largest = largest.max(row.commit(&mut solver_bodies, next));
        }
        for block in &mut blocks {
            largest = largest.max(block.solve(&mut solver_bodies));
        }
        if config.integrator == Integrator::Accurate && largest < config.accurate_tolerance {
            tracing::trace!(sweeps = sweep + 1, "solver converged");
            break;
        }
    }

    let mut next_states = Vec::with_capacity(solver_bodies.len());
    for sb in &solver_bodies {
        let position = sb.position + sb.linear * h;
        let rotation = UnitQuaternion::from_scaled_axis(sb.angular * h) * sb.rotation;
        let pose = Pose::from_position_rotation(position, rotation);
        if !pose.is_finite() || !sb.linear.iter().chain(sb.angular.iter()).all(|x| x.is_finite())
        {
            for (_, body) in bodies.iter_mut() {
                body.clear_accumulators();
            }
            return Err(SimError::integration(format!(
                "non-finite state for body {:?}",
                sb.handle
            )));
        }
        next_states.push((sb.handle, pose, sb.linear, sb.angular));
    }

    for (handle, pose, linear, angular) in next_states {
        if let Some(body) = bodies.get_mut(handle) {
            body.state.pose = pose;
            body.state.twist.linear = linear;
            body.state.twist.angular = angular;
            body.clear_accumulators();
        }
    }

    let mut feedback = vec![ContactFeedback::default(); feedback_slots];
    for block in &blocks {
        if let Some(slot) = block.feedback.and_then(|s| feedback.get_mut(s)) {
            *slot = block.feedback(h);
        }
    }
    Ok(feedback)
}

fn build_contacts(
    contacts: &[ContactJoint],
    bodies: &[SolverBody],
    index: &dyn Fn(Option<BodyHandle>) -> Option<usize>,
    h: f64,
) -> Vec<ContactBlock> {
    contacts
        .iter()
        .map(|c| {
            let a = index(c.first);
            let b = index(c.second);
            let r_a = a.map_or_else(Vector3::zeros, |i| c.position - bodies[i].position);
            let r_b = b.map_or_else(Vector3::zeros, |i| c.position - bodies[i].position);
            let n = c.normal;
            let (t1, t2) = c.tangents;
            let p = &c.params;
            let cfm_gamma = p.cfm / h;

            let row = |dir: Vector3<f64>| Row::new(a, b, dir, r_a.cross(&dir), -r_b.cross(&dir));

            let mut normal = row(n);
            normal.prepare(bodies, 0.0, cfm_gamma);
            let approach = normal.velocity(bodies);
            let mut target = p.erp * c.depth / h - c.gap / h;
            if let Some(bounce) = p.bounce {
                let closing = -approach;
                if closing > bounce.threshold && (c.gap <= 0.0 || closing * h > c.gap) {
                    target = target.max(bounce.restitution * closing);
                }
            }
            normal.prepare(bodies, target, cfm_gamma);

            let (motion1, motion2) = p.motion.unwrap_or((0.0, 0.0));
            let (slip1, slip2) = p.slip.unwrap_or((0.0, 0.0));
            let mut t1_row = row(t1);
            t1_row.prepare(bodies, motion1, cfm_gamma + slip1 / h);
            let mut t2_row = row(t2);
            t2_row.prepare(bodies, motion2, cfm_gamma + slip2 / h);

            ContactBlock {
                normal,
                t1: t1_row,
                t2: t2_row,
                mu1: p.mu1,
                mu2: p.effective_mu2(),
                pyramid: p.approx_pyramid,
                r_a,
                r_b,
                basis: [n, t1, t2],
                feedback: c.feedback,
            }
        })
        .collect()
}

fn side_frame(side: &JointSide, bodies: &Arena<SimBody>) -> Pose {
    side.body
        .and_then(|h| bodies.get(h))
        .map_or(side.offset, |b| b.state.pose.compose(&side.offset))
}

fn build_joints(
    config: &SimulationConfig,
    joints: &[JointInput<'_>],
    solver_bodies: &[SolverBody],
    index: &dyn Fn(Option<BodyHandle>) -> Option<usize>,
    h: f64,
    arena: &Arena<SimBody>,
) -> Vec<Row> {
    let gamma = config.cfm / h;
    let bias = config.erp / h;
    let mut rows = Vec::new();

    for input in joints {
        let j = input.joint;
        let a = index(input.first.body);
        let b = index(input.second.body);
        if a.is_none() && b.is_none() {
            continue;
        }
        let frame_a = side_frame(&input.first, arena);
        let frame_b = side_frame(&input.second, arena);

        let p_a = frame_a.transform_point(&j.anchor_first);
        let p_b = frame_b.transform_point(&j.anchor_second);
        let r_a = a.map_or_else(Vector3::zeros, |i| p_a - solver_bodies[i].position);
        let r_b = b.map_or_else(Vector3::zeros, |i| p_b - solver_bodies[i].position);
        let error = p_a - p_b;

        for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
            let mut row = Row::new(a, b, axis, r_a.cross(&axis), -r_b.cross(&axis));
            row.prepare(solver_bodies, -bias * error.dot(&axis), gamma);
            rows.push(row);
        }

        match j.kind {
            JointKind::Ball { .. } => {}
            JointKind::Fixed => {
                let desired = frame_a.rotation * j.reference;
                let e = (frame_b.rotation * desired.inverse()).scaled_axis();
                for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
                    let mut row = Row::angular(a, b, axis);
                    row.prepare(solver_bodies, bias * e.dot(&axis), gamma);
                    rows.push(row);
                }
            }
            JointKind::Hinge { .. } => {
                let axis_a = frame_a.transform_vector(&j.axis_first);
                let axis_b = frame_b.transform_vector(&j.axis_second);
                let e = axis_a.cross(&axis_b);
                let helper = if axis_a.x.abs() < 0.9 {
                    Vector3::x()
                } else {
                    Vector3::y()
                };
                let p = axis_a.cross(&helper).normalize();
                let q = axis_a.cross(&p);
                for perp in [p, q] {
                    let mut row = Row::angular(a, b, perp);
                    row.prepare(solver_bodies, bias * e.dot(&perp), gamma);
                    rows.push(row);
                }
            }
        }
    }
    rows
}
