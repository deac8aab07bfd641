//! Error types shared by every stage of the perturbation pipeline
//!
//! Failures fall into the categories a run can actually hit:
//!
//! - **Configuration**: rejected by validation before any integration starts
//! - **Precision / Numerical / Approximation**: fatal for the owning task and,
//!   through the join barrier, for the whole run
//! - **Collaborator**: a background or thermodynamics query that could not be
//!   answered (usually a time outside the tabulated range)
//!
//! Physical-consistency warnings are not errors; they go through `log::warn!`.

use thiserror::Error;

/// Errors raised while building grids, integrating or interpolating sources
#[derive(Debug, Error)]
pub enum PerturbError {
    /// A setting is out of range or incompatible with the cosmology content
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step size underflowed relative to the running coordinate
    #[error("precision error: {0}")]
    Precision(String),

    /// The approximation scheme cannot be resolved into ordered intervals
    #[error("approximation scheme error: {0}")]
    Approximation(String),

    /// Division by a vanishing quantity, non-finite state, failed linear solve
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Background or thermodynamics collaborator failed to answer a query
    #[error("collaborator query failed: {0}")]
    Collaborator(String),

    /// Failure of one (mode, initial condition, k) integration
    #[error("{mode} mode, {ic} initial condition, k = {k:e} Mpc^-1: {source}")]
    Task {
        mode: String,
        ic: String,
        k: f64,
        #[source]
        source: Box<PerturbError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type PerturbResult<T> = Result<T, PerturbError>;

impl PerturbError {
    /// Wrap an error with the identity of the task that produced it
    pub fn in_task(self, mode: &str, ic: &str, k: f64) -> Self {
        PerturbError::Task {
            mode: mode.to_string(),
            ic: ic.to_string(),
            k,
            source: Box::new(self),
        }
    }

    /// True for errors detected while validating settings
    pub fn is_configuration(&self) -> bool {
        match self {
            PerturbError::Configuration(_) => true,
            PerturbError::Task { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Innermost error, skipping task wrappers
    pub fn root(&self) -> &PerturbError {
        match self {
            PerturbError::Task { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wrapper_keeps_root() {
        let error = PerturbError::Approximation("cannot handle simultaneous switches".into())
            .in_task("scalar", "ad", 0.05);

        let message = error.to_string();
        assert!(message.contains("scalar"));
        assert!(message.contains("k = 5e-2"));
        assert!(matches!(error.root(), PerturbError::Approximation(_)));
    }

    #[test]
    fn test_configuration_detection() {
        let error = PerturbError::Configuration("bad gauge".into());
        assert!(error.is_configuration());
        assert!(!PerturbError::Numerical("nan".into()).is_configuration());
    }
}
