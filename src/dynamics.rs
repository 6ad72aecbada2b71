use nalgebra::{DMatrix, DVector};

use crate::error::TrajOptError;

/// Perturbation size for the central-difference Jacobians.
pub const FINITE_DIFF_EPSILON: f64 = 1e-5;

/// Single-step interface to an external forward simulator.
///
/// Implementations own their simulator handle; `step` takes `&mut self`
/// because most physics engines keep mutable internal state between calls.
/// Dimensions and the integration timestep are fixed for the lifetime of the
/// oracle and are never inspected beyond these accessors.
pub trait Dynamics {
    fn state_dim(&self) -> usize;
    fn control_dim(&self) -> usize;
    fn timestep(&self) -> f64;

    /// Advance the simulator by one fixed timestep.
    ///
    /// Must return [`TrajOptError::SimulationFailure`] instead of a state
    /// containing NaN or infinity (contact-solver blow-up).
    fn step(&mut self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, TrajOptError>;

    /// `step` with an extra finiteness check on the returned state, so a
    /// careless implementation cannot leak NaNs into the optimizer.
    fn step_checked(
        &mut self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, TrajOptError> {
        let x_next = self.step(x, u)?;
        if x_next.iter().all(|v| v.is_finite()) {
            Ok(x_next)
        } else {
            Err(TrajOptError::SimulationFailure)
        }
    }

    /// Jacobians (A, B) of the step map at (x, u), A = dx_next/dx (n x n),
    /// B = dx_next/du (n x m).
    ///
    /// Default: central finite differences, perturbing one dimension at a
    /// time. Costs 2 * (state_dim + control_dim) simulation calls, which
    /// dominates the runtime of the whole optimization. The per-dimension
    /// probes are independent of each other, but parallelizing them needs
    /// one simulator instance per worker; a shared stateful handle forces
    /// the sequential order used here.
    fn linearize(
        &mut self,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TrajOptError> {
        let n = self.state_dim();
        let m = self.control_dim();
        let eps = FINITE_DIFF_EPSILON;

        let mut a = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            let mut x_plus = x.clone();
            let mut x_minus = x.clone();
            x_plus[i] += eps;
            x_minus[i] -= eps;
            let f_plus = self.step_checked(&x_plus, u)?;
            let f_minus = self.step_checked(&x_minus, u)?;
            a.set_column(i, &((f_plus - f_minus) / (2.0 * eps)));
        }

        let mut b = DMatrix::<f64>::zeros(n, m);
        for i in 0..m {
            let mut u_plus = u.clone();
            let mut u_minus = u.clone();
            u_plus[i] += eps;
            u_minus[i] -= eps;
            let f_plus = self.step_checked(x, &u_plus)?;
            let f_minus = self.step_checked(x, &u_minus)?;
            b.set_column(i, &((f_plus - f_minus) / (2.0 * eps)));
        }

        Ok((a, b))
    }
}
