//! Configuration types for the physics world.
//!
//! These values are the world-level parameters: step size, gravity, global
//! constraint softness and stiffness, and the choice of integrator. They can
//! be changed between steps; the world picks the new values up at the start
//! of the next step.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Numerical integrator used to advance the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Integrator {
    /// Iterate the constraint solver until the impulse update falls below
    /// the configured tolerance (or the iteration cap is reached).
    #[default]
    Accurate,
    /// Run a fixed number of solver sweeps per step.
    Quick,
}

/// World-level simulation configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// Step size in seconds. A non-positive value makes `step()` a no-op.
    pub step_size: f64,
    /// Gravity vector (m/s²).
    pub gravity: Vector3<f64>,
    /// Global constraint force mixing, applied to user joints.
    pub cfm: f64,
    /// Global error reduction parameter, applied to user joints.
    pub erp: f64,
    /// Integrator selection.
    pub integrator: Integrator,
    /// Sweeps per step for [`Integrator::Quick`].
    pub solver_iterations: usize,
    /// Convergence tolerance on the largest impulse change for [`Integrator::Accurate`].
    pub accurate_tolerance: f64,
    /// Iteration cap for [`Integrator::Accurate`].
    pub accurate_max_iterations: usize,
    /// Distance above a surface within which contacts are still generated.
    pub contact_margin: f64,
    /// Publish a debug draw item for every contact point.
    pub draw_contact_points: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_size: 0.01,
            gravity: Vector3::new(0.0, 0.0, -9.81),
            cfm: 1e-10,
            erp: 0.1,
            integrator: Integrator::Accurate,
            solver_iterations: 20,
            accurate_tolerance: 1e-9,
            accurate_max_iterations: 200,
            contact_margin: 1e-3,
            draw_contact_points: false,
        }
    }
}

impl SimulationConfig {
    /// Configuration with the given step size.
    #[must_use]
    pub fn with_step_size(step_size: f64) -> Self {
        Self {
            step_size,
            ..Default::default()
        }
    }

    /// Fixed-cost configuration for interactive use.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            integrator: Integrator::Quick,
            solver_iterations: 10,
            ..Default::default()
        }
    }

    /// Small steps with the iterative integrator run to a tight tolerance.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            step_size: 0.001,
            integrator: Integrator::Accurate,
            accurate_tolerance: 1e-12,
            accurate_max_iterations: 500,
            ..Default::default()
        }
    }

    /// Set the gravity vector.
    #[must_use]
    pub fn gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Disable gravity.
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Vector3::zeros();
        self
    }

    /// Set the integrator.
    #[must_use]
    pub fn integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }

    /// Set the global softness and stiffness.
    #[must_use]
    pub fn softness(mut self, cfm: f64, erp: f64) -> Self {
        self.cfm = cfm;
        self.erp = erp;
        self
    }

    /// Publish contact points as debug draw items.
    #[must_use]
    pub fn with_contact_drawing(mut self) -> Self {
        self.draw_contact_points = true;
        self
    }

    /// Validate the configuration.
    ///
    /// A non-positive step size is accepted here: it is the documented way
    /// to pause stepping. Non-finite values are rejected.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.step_size.is_finite() {
            return Err(crate::SimError::InvalidTimestep(self.step_size));
        }

        if self.step_size > 1.0 {
            return Err(crate::SimError::invalid_config(
                "step_size > 1 second is likely an error",
            ));
        }

        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }

        if !(0.0..=1.0).contains(&self.erp) {
            return Err(crate::SimError::invalid_config(
                "erp must be between 0 and 1",
            ));
        }

        if self.cfm < 0.0 || !self.cfm.is_finite() {
            return Err(crate::SimError::invalid_config(
                "cfm must be finite and non-negative",
            ));
        }

        if self.solver_iterations == 0 || self.accurate_max_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "solver iterations must be at least 1",
            ));
        }

        if self.contact_margin < 0.0 {
            return Err(crate::SimError::invalid_config(
                "contact_margin cannot be negative",
            ));
        }

        Ok(())
    }

    /// Whether `step()` should do any work with this configuration.
    #[must_use]
    pub fn is_stepping(&self) -> bool {
        self.step_size > 0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.step_size, 0.01);
        assert_eq!(config.gravity, Vector3::new(0.0, 0.0, -9.81));
        assert_eq!(config.cfm, 1e-10);
        assert_eq!(config.erp, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_step_is_valid_but_idle() {
        let config = SimulationConfig::with_step_size(0.0);
        assert!(config.validate().is_ok());
        assert!(!config.is_stepping());
    }

    #[test]
    fn test_validation_errors() {
        assert!(
            SimulationConfig::with_step_size(f64::NAN)
                .validate()
                .is_err()
        );
        assert!(SimulationConfig::default().softness(-1.0, 0.1).validate().is_err());
        assert!(SimulationConfig::default().softness(0.0, 1.5).validate().is_err());

        let mut config = SimulationConfig::default();
        config.solver_iterations = 0;
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_presets() {
        assert_eq!(SimulationConfig::realtime().integrator, Integrator::Quick);
        assert!(SimulationConfig::high_accuracy().validate().is_ok());
    }
}
