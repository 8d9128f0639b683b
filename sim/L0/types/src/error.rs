//! Error types for simulation operations.

use thiserror::Error;

/// Errors that can occur while building or stepping a world.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid step size.
    #[error("invalid step size: {0} (must be finite)")]
    InvalidTimestep(f64),

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },

    /// The world has not been initialized.
    #[error("world is not initialized")]
    NotInitialized,

    /// A node could not be allocated; nothing was registered.
    #[error("failed to create node '{name}': {reason}")]
    ResourceAllocation {
        /// Name of the node that failed.
        name: String,
        /// Why allocation failed.
        reason: String,
    },

    /// Node not found.
    #[error("unknown node: {0}")]
    UnknownNode(u64),

    /// Joint not found.
    #[error("unknown joint: {0}")]
    UnknownJoint(u64),

    /// The transform structure reachable from the root is not a tree.
    #[error("loop in tree detected: {source_frame} --> {target_frame}")]
    StructuralLoop {
        /// Source frame of the offending cross edge.
        source_frame: String,
        /// Target frame of the offending cross edge.
        target_frame: String,
    },

    /// A frame needed for propagation is missing from the transform store.
    #[error("transform store error: {reason}")]
    TransformStore {
        /// Description from the store.
        reason: String,
    },

    /// Numerical integration failed; the step was not committed.
    #[error("integration failed: {reason}")]
    Integration {
        /// Description of what went wrong.
        reason: String,
    },

    /// The solver reported an error during the step.
    #[error("solver error: {reason}")]
    Solver {
        /// Solver message.
        reason: String,
    },

    /// A lock guarding world state was poisoned by a panicking thread.
    #[error("world state lock poisoned")]
    LockPoisoned,
}

impl SimError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Create a resource allocation error.
    #[must_use]
    pub fn allocation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceAllocation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a structural loop error.
    #[must_use]
    pub fn structural_loop(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::StructuralLoop {
            source_frame: source.into(),
            target_frame: target.into(),
        }
    }

    /// Create an integration error.
    #[must_use]
    pub fn integration(reason: impl Into<String>) -> Self {
        Self::Integration {
            reason: reason.into(),
        }
    }

    /// Create a transform store error.
    #[must_use]
    pub fn transform_store(reason: impl Into<String>) -> Self {
        Self::TransformStore {
            reason: reason.into(),
        }
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::InvalidTimestep(_)
        )
    }

    /// Check if this is a transform-structure error.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::StructuralLoop { .. })
    }

    /// Check if this error aborted a step's integration.
    #[must_use]
    pub fn is_solver_error(&self) -> bool {
        matches!(self, Self::Integration { .. } | Self::Solver { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::structural_loop("a", "b");
        assert_eq!(err.to_string(), "loop in tree detected: a --> b");

        let err = SimError::allocation("wheel", "zero radius");
        assert!(err.to_string().contains("wheel"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(SimError::structural_loop("a", "b").is_structural());
        assert!(SimError::integration("nan").is_solver_error());
        assert!(SimError::invalid_config("x").is_config_error());
        assert!(!SimError::NotInitialized.is_config_error());
    }
}
