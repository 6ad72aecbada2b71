use nalgebra::{DMatrix, DVector};

use crate::cost::QuadraticCost;
use crate::dynamics::Dynamics;
use crate::error::TrajOptError;

/// Time-varying control law produced by a backward pass. Valid only for the
/// nominal trajectory the pass was run against.
#[derive(Debug, Clone)]
pub struct Gains {
    /// K_t, control_dim x state_dim
    pub feedback: Vec<DMatrix<f64>>,
    /// k_t, control_dim
    pub feedforward: Vec<DVector<f64>>,
}

/// Factor the regularized Quu and solve for (K, k); `None` when Quu + reg*I
/// is not positive-definite.
fn try_gains(
    quu_reg: DMatrix<f64>,
    qux: &DMatrix<f64>,
    qu: &DVector<f64>,
) -> Option<(DMatrix<f64>, DVector<f64>)> {
    let chol = quu_reg.cholesky()?;
    Some((-chol.solve(qux), -chol.solve(qu)))
}

/// Riccati-style backward recursion over the nominal trajectory.
///
/// Linearizes the dynamics at every step, forms the action-value expansion
/// and propagates the value-function expansion from the terminal cost back
/// to t = 0. Fails with `IllConditioned` when the regularized Quu loses
/// positive-definiteness and with `SimulationFailure` when a
/// finite-difference probe blows up; in both cases the driver raises
/// regularization and reruns the whole pass.
pub(crate) fn backward_pass<D: Dynamics>(
    dynamics: &mut D,
    cost: &QuadraticCost,
    states: &[DVector<f64>],
    controls: &[DVector<f64>],
    regularization: f64,
) -> Result<Gains, TrajOptError> {
    let horizon = controls.len();
    let n = cost.state_dim();
    let m = cost.control_dim();

    let mut vx = cost.terminal_gradient(horizon, &states[horizon]);
    let mut vxx = cost.terminal_hessian().clone();

    let mut feedback = vec![DMatrix::<f64>::zeros(m, n); horizon];
    let mut feedforward = vec![DVector::<f64>::zeros(m); horizon];
    let reg_eye = DMatrix::<f64>::identity(m, m) * regularization;

    for t in (0..horizon).rev() {
        let (a, b) = dynamics.linearize(&states[t], &controls[t])?;
        let at = a.transpose();
        let bt = b.transpose();

        // action-value expansion around (x_t, u_t)
        let qx = cost.running_gradient_state(t, &states[t]) + &at * &vx;
        let qu = cost.running_gradient_control(&controls[t]) + &bt * &vx;
        let qxx = cost.running_hessian_state() + &at * &vxx * &a;
        let quu = cost.running_hessian_control() + &bt * &vxx * &b;
        let qux = &bt * &vxx * &a;

        let Some((k_fb, k_ff)) = try_gains(&quu + &reg_eye, &qux, &qu) else {
            return Err(TrajOptError::IllConditioned {
                step: t,
                regularization,
            });
        };

        // Vx = Qx - K' Quu k, Vxx = Qxx - K' Quu K, in the reduced forms
        vx = qx + k_fb.transpose() * &qu;
        vxx = qxx + k_fb.transpose() * &qux;
        vxx = (&vxx + vxx.transpose()) * 0.5;

        feedback[t] = k_fb;
        feedforward[t] = k_ff;
    }

    Ok(Gains {
        feedback,
        feedforward,
    })
}
