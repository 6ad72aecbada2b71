use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cost::{QuadraticCost, Target};
use crate::dynamics::Dynamics;
use crate::error::TrajOptError;

use super::backward::backward_pass;
use super::forward::forward_pass;
use super::options::IlqrOptions;

/// How a solve ended. Only `Converged` means the convergence criterion was
/// met; every variant still comes with the best trajectory found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    MaxIterationsReached,
    /// Regularization hit its cap without ever producing an acceptable
    /// step; typically a sign the finite differences are meaningless at the
    /// current nominal (deep inter-penetration, solver blow-up).
    RegularizationExhausted,
    Cancelled,
}

/// Result of one `solve` call.
#[derive(Debug, Clone)]
pub struct IlqrSolution {
    /// state_dim x (N + 1)
    pub states: DMatrix<f64>,
    /// control_dim x N
    pub controls: DMatrix<f64>,
    pub final_cost: f64,
    pub solve_time: Duration,
    pub status: SolveStatus,
    /// Accepted iterations plus failed attempts that consumed the budget.
    pub iterations: usize,
    /// Total cost after the initial rollout and after each accepted
    /// iteration, in order. Non-increasing by construction.
    pub cost_history: Vec<f64>,
    /// Every value the regularization took during the solve, starting with
    /// the initial one. Stays within [0, max_regularization].
    pub regularization_history: Vec<f64>,
    pub final_regularization: f64,
}

/// Scalar diagnostics of a solve, serializable for dumping next to logs or
/// config files. The trajectory matrices stay on [`IlqrSolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveSummary {
    pub status: SolveStatus,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub cost_history: Vec<f64>,
    pub regularization_history: Vec<f64>,
    pub final_regularization: f64,
    pub solve_time: Duration,
}

impl IlqrSolution {
    pub fn summary(&self) -> SolveSummary {
        SolveSummary {
            status: self.status,
            iterations: self.iterations,
            initial_cost: self.cost_history[0],
            final_cost: self.final_cost,
            cost_history: self.cost_history.clone(),
            regularization_history: self.regularization_history.clone(),
            final_regularization: self.final_regularization,
            solve_time: self.solve_time,
        }
    }
}

/// Iterative LQR over a black-box forward simulator.
///
/// Repeatedly linearizes the dynamics around the current nominal trajectory
/// (backward pass), rolls out the updated control law with a backtracking
/// line search (forward pass) and adapts a scalar regularization between
/// the two. The simulator is consumed only through the [`Dynamics`] trait;
/// the driver never inspects its configuration.
///
/// All trajectory state lives inside [`solve`](Self::solve): the value can
/// be reused for further solves with a fresh initial state and guess.
pub struct IterativeLinearQuadraticRegulator<D: Dynamics> {
    dynamics: D,
    cost: QuadraticCost,
    options: IlqrOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl<D: Dynamics> IterativeLinearQuadraticRegulator<D> {
    pub fn new(
        dynamics: D,
        cost: QuadraticCost,
        options: IlqrOptions,
    ) -> Result<IterativeLinearQuadraticRegulator<D>, TrajOptError> {
        options.validate()?;
        if cost.state_dim() != dynamics.state_dim() {
            return Err(TrajOptError::DimensionMismatch {
                what: "cost state dimension",
                expected: dynamics.state_dim(),
                got: cost.state_dim(),
            });
        }
        if cost.control_dim() != dynamics.control_dim() {
            return Err(TrajOptError::DimensionMismatch {
                what: "cost control dimension",
                expected: dynamics.control_dim(),
                got: cost.control_dim(),
            });
        }
        if (cost.dt() - dynamics.timestep()).abs() > 1e-12 {
            return Err(TrajOptError::InvalidOptions {
                what: "dt",
                reason: "cost and dynamics timesteps differ",
            });
        }
        Ok(IterativeLinearQuadraticRegulator {
            dynamics,
            cost,
            options,
            cancel: None,
        })
    }

    /// Install a token checked between iterations; setting it makes the
    /// running solve return its best trajectory with status `Cancelled`.
    /// Useful because a contact-rich solve can run for many seconds.
    pub fn set_cancel_token(&mut self, token: Arc<AtomicBool>) {
        self.cancel = Some(token);
    }

    pub fn dynamics_mut(&mut self) -> &mut D {
        &mut self.dynamics
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|t| t.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Raise regularization after a failed backward or forward pass.
    /// Multiplicative growth cannot leave zero, so delta = 0 is seeded with
    /// a small positive value first.
    fn grow_regularization(&self, reg: f64) -> f64 {
        if reg <= 0.0 {
            1e-6
        } else {
            reg * self.options.regularization_growth
        }
    }

    fn check_inputs(
        &self,
        x0: &DVector<f64>,
        u_guess: &DMatrix<f64>,
    ) -> Result<(), TrajOptError> {
        let n = self.dynamics.state_dim();
        let m = self.dynamics.control_dim();
        if x0.len() != n {
            return Err(TrajOptError::DimensionMismatch {
                what: "initial state",
                expected: n,
                got: x0.len(),
            });
        }
        if u_guess.nrows() != m {
            return Err(TrajOptError::DimensionMismatch {
                what: "control guess rows",
                expected: m,
                got: u_guess.nrows(),
            });
        }
        if u_guess.ncols() == 0 {
            return Err(TrajOptError::DimensionMismatch {
                what: "control guess columns (horizon)",
                expected: 1,
                got: 0,
            });
        }
        match self.cost.target() {
            Target::Fixed(x) if x.len() != n => Err(TrajOptError::DimensionMismatch {
                what: "target state",
                expected: n,
                got: x.len(),
            }),
            Target::Sequence(xs) if xs.len() != u_guess.ncols() + 1 => {
                Err(TrajOptError::DimensionMismatch {
                    what: "target sequence length",
                    expected: u_guess.ncols() + 1,
                    got: xs.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Simulate the initial guess to get the first nominal trajectory. A
    /// failure here is fatal: with no nominal there is nothing to fall back
    /// to.
    fn initial_rollout(
        &mut self,
        x0: &DVector<f64>,
        u_guess: &DMatrix<f64>,
    ) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>), TrajOptError> {
        let horizon = u_guess.ncols();
        let mut states = Vec::with_capacity(horizon + 1);
        let mut controls = Vec::with_capacity(horizon);
        states.push(x0.clone());
        for t in 0..horizon {
            let u = u_guess.column(t).clone_owned();
            let next = self.dynamics.step_checked(&states[t], &u)?;
            states.push(next);
            controls.push(u);
        }
        Ok((states, controls))
    }

    /// Compute a locally optimal trajectory from `x0` under the initial
    /// control guess (control_dim x N, one column per step).
    ///
    /// Never fails once the initial rollout succeeds: hitting the iteration
    /// budget or the regularization cap returns the best trajectory found
    /// with the corresponding status.
    pub fn solve(
        &mut self,
        x0: &DVector<f64>,
        u_guess: &DMatrix<f64>,
    ) -> Result<IlqrSolution, TrajOptError> {
        self.check_inputs(x0, u_guess)?;
        let start = Instant::now();

        let (mut states, mut controls) = self.initial_rollout(x0, u_guess)?;
        let mut current_cost = self.cost.trajectory(&states, &controls);
        let mut cost_history = vec![current_cost];
        let mut reg = self.options.initial_regularization;
        let mut reg_history = vec![reg];
        let mut status = SolveStatus::MaxIterationsReached;
        let mut iterations = 0;

        debug!(initial_cost = current_cost, horizon = controls.len(), "starting solve");

        'iterations: for iter in 1..=self.options.max_iterations {
            if self.cancelled() {
                status = SolveStatus::Cancelled;
                break;
            }
            iterations = iter;

            // backward pass, rerun with more regularization until it holds
            let gains = loop {
                match backward_pass(&mut self.dynamics, &self.cost, &states, &controls, reg) {
                    Ok(gains) => break gains,
                    Err(
                        e @ (TrajOptError::IllConditioned { .. }
                        | TrajOptError::SimulationFailure),
                    ) => {
                        warn!(iteration = iter, regularization = reg, "backward pass failed: {e}");
                        let grown = self.grow_regularization(reg);
                        if grown > self.options.max_regularization {
                            status = SolveStatus::RegularizationExhausted;
                            break 'iterations;
                        }
                        reg = grown;
                        reg_history.push(reg);
                    }
                    Err(e) => return Err(e),
                }
            };

            match forward_pass(
                &mut self.dynamics,
                &self.cost,
                &states,
                &controls,
                current_cost,
                &gains,
                self.options.line_search_shrink,
                self.options.max_line_search_steps,
            ) {
                Ok(candidate) => {
                    let improvement = current_cost - candidate.cost;
                    states = candidate.states;
                    controls = candidate.controls;
                    current_cost = candidate.cost;
                    cost_history.push(current_cost);
                    reg = (reg * self.options.regularization_decay)
                        .max(self.options.min_regularization);
                    reg_history.push(reg);
                    debug!(
                        iteration = iter,
                        cost = current_cost,
                        improvement,
                        step_size = candidate.step_size,
                        regularization = reg,
                        "accepted"
                    );
                    if improvement <= self.options.abs_cost_tolerance
                        || improvement <= self.options.rel_cost_tolerance * current_cost.abs()
                    {
                        status = SolveStatus::Converged;
                        break;
                    }
                }
                Err(TrajOptError::NoImprovementFound { best_cost }) => {
                    // a best candidate within tolerance of the nominal means
                    // the trajectory is already locally optimal
                    let gap = best_cost - current_cost;
                    if gap <= self.options.abs_cost_tolerance
                        || gap <= self.options.rel_cost_tolerance * current_cost.abs()
                    {
                        status = SolveStatus::Converged;
                        break;
                    }
                    trace!(iteration = iter, best_cost, regularization = reg, "line search stalled");
                    let grown = self.grow_regularization(reg);
                    if grown > self.options.max_regularization {
                        status = SolveStatus::RegularizationExhausted;
                        break;
                    }
                    reg = grown;
                    reg_history.push(reg);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            ?status,
            final_cost = current_cost,
            iterations,
            solve_time = ?start.elapsed(),
            "solve finished"
        );

        Ok(IlqrSolution {
            states: DMatrix::from_columns(&states),
            controls: DMatrix::from_columns(&controls),
            final_cost: current_cost,
            solve_time: start.elapsed(),
            status,
            iterations,
            cost_history,
            regularization_history: reg_history,
            final_regularization: reg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DoubleIntegrator, LinearSystem};
    use approx::assert_abs_diff_eq;

    fn double_integrator_setup() -> IterativeLinearQuadraticRegulator<DoubleIntegrator> {
        let dt = 0.1;
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1) * 0.01,
            DMatrix::identity(2, 2) * 100.0,
            dt,
        )
        .unwrap()
        .with_target(DVector::from_vec(vec![1.0, 0.0]));
        IterativeLinearQuadraticRegulator::new(
            DoubleIntegrator::new(dt),
            cost,
            IlqrOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn double_integrator_reaches_target() {
        let horizon = 20;
        let mut solver = double_integrator_setup();
        let x0 = DVector::zeros(2);
        let u_guess = DMatrix::zeros(1, horizon);

        let solution = solver.solve(&x0, &u_guess).unwrap();

        assert!(solution.iterations <= 10, "took {}", solution.iterations);
        let final_position = solution.states[(0, horizon)];
        assert_abs_diff_eq!(final_position, 1.0, epsilon = 0.05);
        assert_eq!(solution.status, SolveStatus::Converged);
    }

    #[test]
    fn accepted_costs_never_increase() {
        let horizon = 20;
        let mut solver = double_integrator_setup();
        let solution = solver
            .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
            .unwrap();

        for pair in solution.cost_history.windows(2) {
            assert!(pair[1] <= pair[0], "cost went up: {:?}", pair);
        }
    }

    #[test]
    fn trajectory_shapes_hold_for_any_horizon() {
        for horizon in [1usize, 2, 7, 20] {
            let mut solver = double_integrator_setup();
            let solution = solver
                .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
                .unwrap();
            assert_eq!(solution.states.ncols(), horizon + 1);
            assert_eq!(solution.states.nrows(), 2);
            assert_eq!(solution.controls.ncols(), horizon);
            assert_eq!(solution.controls.nrows(), 1);
        }
    }

    #[test]
    fn regularization_stays_within_bounds_under_growth() {
        let dt = 0.1;
        let horizon = 20;
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1) * 0.01,
            DMatrix::identity(2, 2) * 100.0,
            dt,
        )
        .unwrap()
        .with_target(DVector::from_vec(vec![1.0, 0.0]));

        // one blow-up inside the first backward pass forces a growth step
        let oracle = FlakyOracle {
            inner: DoubleIntegrator::new(dt),
            calls: 0,
            fail_at: 30,
        };
        let mut solver =
            IterativeLinearQuadraticRegulator::new(oracle, cost, IlqrOptions::default()).unwrap();
        let options = IlqrOptions::default();

        let solution = solver
            .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
            .unwrap();

        assert!(solution
            .regularization_history
            .iter()
            .all(|&r| r >= 0.0 && r <= options.max_regularization));
        assert!(solution
            .regularization_history
            .iter()
            .any(|&r| r > options.initial_regularization));
        assert!(solution.final_regularization >= 0.0);
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        use rand::{rngs::StdRng, SeedableRng};
        use rand_distr::{Distribution, Normal};

        let horizon = 15;
        let x0 = DVector::from_vec(vec![-0.4, 0.2]);
        let mut rng = StdRng::seed_from_u64(42);
        let normal = Normal::new(0.0, 0.1).unwrap();
        let u_guess = DMatrix::from_fn(1, horizon, |_, _| normal.sample(&mut rng));

        let first = double_integrator_setup().solve(&x0, &u_guess).unwrap();
        let second = double_integrator_setup().solve(&x0, &u_guess).unwrap();

        assert_eq!(first.states, second.states);
        assert_eq!(first.controls, second.controls);
        assert_eq!(first.final_cost, second.final_cost);
    }

    #[test]
    fn one_iteration_reproduces_finite_horizon_lqr() {
        let dt = 0.1;
        let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
        let horizon = 15;

        let q = DMatrix::identity(2, 2);
        let r = DMatrix::identity(1, 1) * 0.1;
        let qf = DMatrix::identity(2, 2) * 5.0;

        // closed-form finite-horizon LQR via the Riccati recursion,
        // regulating to the origin
        let mut p = qf.clone();
        let mut lqr_gains = vec![DMatrix::<f64>::zeros(1, 2); horizon];
        for t in (0..horizon).rev() {
            let quu = &r * dt + b.transpose() * &p * &b;
            let k = quu.try_inverse().unwrap() * b.transpose() * &p * &a;
            p = &q * dt + a.transpose() * &p * &a - a.transpose() * &p * &b * &k;
            lqr_gains[t] = k;
        }
        let x0 = DVector::from_vec(vec![1.0, 0.0]);
        let mut x = x0.clone();
        let mut lqr_states = vec![x0.clone()];
        for t in 0..horizon {
            let u = -&lqr_gains[t] * &x;
            x = &a * &x + &b * &u;
            lqr_states.push(x.clone());
        }

        let cost = QuadraticCost::new(q.clone(), r.clone(), qf.clone(), dt).unwrap();
        let mut solver = IterativeLinearQuadraticRegulator::new(
            LinearSystem::new(a.clone(), b.clone(), dt),
            cost,
            IlqrOptions::default()
                .with_regularization(0.0, 0.0)
                .with_max_iterations(1),
        )
        .unwrap();

        let solution = solver.solve(&x0, &DMatrix::zeros(1, horizon)).unwrap();

        for t in 0..=horizon {
            for i in 0..2 {
                assert_abs_diff_eq!(
                    solution.states[(i, t)],
                    lqr_states[t][i],
                    epsilon = 1e-6
                );
            }
        }
    }

    #[test]
    fn already_optimal_guess_terminates_in_one_iteration() {
        let dt = 0.1;
        let horizon = 12;
        let x0 = DVector::from_vec(vec![0.3, -0.5]);

        // target sequence = free rollout of the zero guess, so the guess is
        // exactly optimal
        let mut model = DoubleIntegrator::new(dt);
        let mut targets = vec![x0.clone()];
        let u_zero = DVector::zeros(1);
        for t in 0..horizon {
            let next = model.step_checked(&targets[t], &u_zero).unwrap();
            targets.push(next);
        }

        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            dt,
        )
        .unwrap()
        .with_target_sequence(targets)
        .unwrap();

        let mut solver =
            IterativeLinearQuadraticRegulator::new(model, cost, IlqrOptions::default()).unwrap();
        let solution = solver.solve(&x0, &DMatrix::zeros(1, horizon)).unwrap();

        assert_eq!(solution.status, SolveStatus::Converged);
        assert_eq!(solution.iterations, 1);
        assert!(solution.final_cost < 1e-9);
    }

    /// Oracle that blows up exactly once, on its n-th simulation call.
    struct FlakyOracle {
        inner: DoubleIntegrator,
        calls: usize,
        fail_at: usize,
    }

    impl Dynamics for FlakyOracle {
        fn state_dim(&self) -> usize {
            self.inner.state_dim()
        }
        fn control_dim(&self) -> usize {
            self.inner.control_dim()
        }
        fn timestep(&self) -> f64 {
            self.inner.timestep()
        }
        fn step(
            &mut self,
            x: &DVector<f64>,
            u: &DVector<f64>,
        ) -> Result<DVector<f64>, TrajOptError> {
            self.calls += 1;
            if self.calls == self.fail_at {
                return Ok(DVector::from_vec(vec![f64::NAN, f64::NAN]));
            }
            self.inner.step(x, u)
        }
    }

    #[test]
    fn recovers_from_injected_simulation_blowup() {
        let dt = 0.1;
        let horizon = 20;
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1) * 0.01,
            DMatrix::identity(2, 2) * 100.0,
            dt,
        )
        .unwrap()
        .with_target(DVector::from_vec(vec![1.0, 0.0]));

        // call 30 lands inside the first backward pass (the initial rollout
        // takes the first 20)
        let oracle = FlakyOracle {
            inner: DoubleIntegrator::new(dt),
            calls: 0,
            fail_at: 30,
        };
        let mut solver =
            IterativeLinearQuadraticRegulator::new(oracle, cost, IlqrOptions::default()).unwrap();

        let solution = solver
            .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
            .unwrap();

        assert!(solution.states.iter().all(|v| v.is_finite()));
        assert!(solution.controls.iter().all(|v| v.is_finite()));
        assert!(solution.final_cost.is_finite());
        assert_eq!(solution.status, SolveStatus::Converged);
    }

    #[test]
    fn cancellation_returns_initial_trajectory() {
        let horizon = 20;
        let mut solver = double_integrator_setup();
        let token = Arc::new(AtomicBool::new(true));
        solver.set_cancel_token(Arc::clone(&token));

        let solution = solver
            .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
            .unwrap();

        assert_eq!(solution.status, SolveStatus::Cancelled);
        assert_eq!(solution.cost_history.len(), 1);
        // no iteration ran, so none should be counted
        assert_eq!(solution.iterations, 0);
    }

    #[test]
    fn summary_mirrors_the_solution_and_serializes() {
        fn assert_serializable<T: serde::Serialize + serde::de::DeserializeOwned>() {}
        assert_serializable::<SolveSummary>();

        let horizon = 20;
        let mut solver = double_integrator_setup();
        let solution = solver
            .solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))
            .unwrap();

        let summary = solution.summary();
        assert_eq!(summary.status, solution.status);
        assert_eq!(summary.iterations, solution.iterations);
        assert_eq!(summary.initial_cost, solution.cost_history[0]);
        assert_eq!(summary.final_cost, solution.final_cost);
        assert_eq!(summary.cost_history, solution.cost_history);
        assert_eq!(
            summary.regularization_history,
            solution.regularization_history
        );
        assert_eq!(summary.solve_time, solution.solve_time);
    }

    #[test]
    fn rejects_mismatched_initial_state() {
        let mut solver = double_integrator_setup();
        let err = solver
            .solve(&DVector::zeros(3), &DMatrix::zeros(1, 10))
            .unwrap_err();
        assert!(matches!(err, TrajOptError::DimensionMismatch { .. }));
    }
}
