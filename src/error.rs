use thiserror::Error;

/// Errors produced while setting up or running a trajectory optimization.
///
/// The first three variants drive the solver's internal retry machinery and
/// are never surfaced from [`solve`](crate::solver::IterativeLinearQuadraticRegulator::solve)
/// once a nominal trajectory exists; the remaining variants are setup errors.
#[derive(Debug, Error)]
pub enum TrajOptError {
    #[error("simulation returned a non-finite or invalid state")]
    SimulationFailure,
    #[error("regularized Quu not positive-definite at step {step} (regularization {regularization:.3e})")]
    IllConditioned { step: usize, regularization: f64 },
    #[error("line search exhausted its backtracking budget (best candidate cost {best_cost:.6e})")]
    NoImprovementFound { best_cost: f64 },
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid cost matrix {what}: {reason}")]
    InvalidCostMatrix {
        what: &'static str,
        reason: &'static str,
    },
    #[error("invalid option {what}: {reason}")]
    InvalidOptions {
        what: &'static str,
        reason: &'static str,
    },
}
