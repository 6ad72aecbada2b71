use nalgebra::DVector;

use crate::cost::QuadraticCost;
use crate::dynamics::Dynamics;
use crate::error::TrajOptError;

use super::backward::Gains;

/// A candidate trajectory accepted by the line search.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
    pub cost: f64,
    /// Step size alpha the candidate was accepted at.
    pub step_size: f64,
}

/// Roll the horizon under u_t = u_t_prev + alpha * k_t + K_t (x_t - x_t_prev).
fn rollout<D: Dynamics>(
    dynamics: &mut D,
    cost: &QuadraticCost,
    nominal_states: &[DVector<f64>],
    nominal_controls: &[DVector<f64>],
    gains: &Gains,
    alpha: f64,
) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>, f64), TrajOptError> {
    let horizon = nominal_controls.len();
    let mut states = Vec::with_capacity(horizon + 1);
    let mut controls = Vec::with_capacity(horizon);
    states.push(nominal_states[0].clone());

    let mut total = 0.0;
    for t in 0..horizon {
        let u = &nominal_controls[t]
            + &gains.feedforward[t] * alpha
            + &gains.feedback[t] * (&states[t] - &nominal_states[t]);
        total += cost.running(t, &states[t], &u);
        let x_next = dynamics.step_checked(&states[t], &u)?;
        states.push(x_next);
        controls.push(u);
    }
    total += cost.terminal(horizon, &states[horizon]);

    if total.is_finite() {
        Ok((states, controls, total))
    } else {
        Err(TrajOptError::SimulationFailure)
    }
}

/// Backtracking line search over the step size.
///
/// Starts at alpha = 1 and shrinks by the beta factor whenever the candidate
/// does not improve on the nominal cost or the simulator blows up mid
/// rollout. Exhausting the budget yields `NoImprovementFound` carrying the
/// best candidate cost seen, which lets the driver tell a stuck line search
/// apart from an already-optimal trajectory.
pub(crate) fn forward_pass<D: Dynamics>(
    dynamics: &mut D,
    cost: &QuadraticCost,
    nominal_states: &[DVector<f64>],
    nominal_controls: &[DVector<f64>],
    nominal_cost: f64,
    gains: &Gains,
    shrink: f64,
    max_backtracks: usize,
) -> Result<Rollout, TrajOptError> {
    let mut alpha = 1.0;
    let mut best_cost = f64::INFINITY;

    for _ in 0..max_backtracks {
        match rollout(dynamics, cost, nominal_states, nominal_controls, gains, alpha) {
            Ok((states, controls, total)) => {
                if total < nominal_cost {
                    return Ok(Rollout {
                        states,
                        controls,
                        cost: total,
                        step_size: alpha,
                    });
                }
                best_cost = best_cost.min(total);
            }
            // a blown-up candidate is rejected like any other, never fatal
            Err(TrajOptError::SimulationFailure) => {}
            Err(e) => return Err(e),
        }
        alpha *= shrink;
    }

    Err(TrajOptError::NoImprovementFound { best_cost })
}
