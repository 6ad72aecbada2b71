use nalgebra::{DMatrix, DVector};

use crate::error::TrajOptError;

/// Reference the state deviation is measured against.
#[derive(Debug, Clone)]
pub enum Target {
    /// Same target state at every timestep.
    Fixed(DVector<f64>),
    /// One target per timestep, x̄_0..x̄_N (length N + 1, checked at solve
    /// setup). The last entry is the terminal target.
    Sequence(Vec<DVector<f64>>),
}

/// Quadratic running + terminal cost with closed-form derivatives.
///
/// Running cost at step t: dt * 0.5 * [(x - x̄_t)' Q (x - x̄_t) + u' R u],
/// scaled by the timestep so the sum approximates a continuous-time
/// integral. Terminal cost: 0.5 * (x_N - x̄_N)' Qf (x_N - x̄_N).
///
/// The Hessians are the constant matrices dt*Q, dt*R and Qf; the cost is
/// separable in x and u so the cross term lux is identically zero.
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    qf: DMatrix<f64>,
    // dt-scaled copies, formed once
    q_dt: DMatrix<f64>,
    r_dt: DMatrix<f64>,
    dt: f64,
    target: Target,
}

fn check_symmetric(m: &DMatrix<f64>, what: &'static str) -> Result<(), TrajOptError> {
    if !m.is_square() {
        return Err(TrajOptError::InvalidCostMatrix {
            what,
            reason: "not square",
        });
    }
    let asym = (m - m.transpose()).abs().max();
    if asym > 1e-9 * (1.0 + m.abs().max()) {
        return Err(TrajOptError::InvalidCostMatrix {
            what,
            reason: "not symmetric",
        });
    }
    Ok(())
}

fn check_psd(m: &DMatrix<f64>, what: &'static str) -> Result<(), TrajOptError> {
    let min_eig = m.symmetric_eigenvalues().min();
    if min_eig < -1e-9 {
        return Err(TrajOptError::InvalidCostMatrix {
            what,
            reason: "not positive semi-definite",
        });
    }
    Ok(())
}

impl QuadraticCost {
    /// `q` and `qf` must be symmetric PSD, `r` symmetric PD; this is
    /// required for a well-posed LQR subproblem and checked here once
    /// rather than at every backward pass.
    pub fn new(
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        qf: DMatrix<f64>,
        dt: f64,
    ) -> Result<QuadraticCost, TrajOptError> {
        check_symmetric(&q, "Q")?;
        check_symmetric(&r, "R")?;
        check_symmetric(&qf, "Qf")?;
        check_psd(&q, "Q")?;
        check_psd(&qf, "Qf")?;
        if r.clone().cholesky().is_none() {
            return Err(TrajOptError::InvalidCostMatrix {
                what: "R",
                reason: "not positive definite",
            });
        }
        if qf.nrows() != q.nrows() {
            return Err(TrajOptError::DimensionMismatch {
                what: "Qf",
                expected: q.nrows(),
                got: qf.nrows(),
            });
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "dt",
                reason: "must be finite and positive",
            });
        }

        let target = Target::Fixed(DVector::zeros(q.nrows()));
        let q_dt = &q * dt;
        let r_dt = &r * dt;
        Ok(QuadraticCost {
            q,
            r,
            qf,
            q_dt,
            r_dt,
            dt,
            target,
        })
    }

    pub fn with_target(mut self, target: DVector<f64>) -> QuadraticCost {
        self.target = Target::Fixed(target);
        self
    }

    /// A per-step target sequence must cover the whole horizon plus the
    /// terminal state; emptiness is rejected here, the exact length is
    /// checked against the horizon at solve setup.
    pub fn with_target_sequence(
        mut self,
        targets: Vec<DVector<f64>>,
    ) -> Result<QuadraticCost, TrajOptError> {
        if targets.is_empty() {
            return Err(TrajOptError::DimensionMismatch {
                what: "target sequence length",
                expected: 1,
                got: 0,
            });
        }
        self.target = Target::Sequence(targets);
        Ok(self)
    }

    pub fn state_dim(&self) -> usize {
        self.q.nrows()
    }

    pub fn control_dim(&self) -> usize {
        self.r.nrows()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn target_at(&self, t: usize) -> &DVector<f64> {
        match &self.target {
            Target::Fixed(x) => x,
            Target::Sequence(xs) => &xs[t.min(xs.len() - 1)],
        }
    }

    /// l(x, u, t)
    pub fn running(&self, t: usize, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let dx = x - self.target_at(t);
        let state_term = (dx.transpose() * &self.q * &dx)[(0, 0)];
        let control_term = (u.transpose() * &self.r * u)[(0, 0)];
        0.5 * self.dt * (state_term + control_term)
    }

    /// lf(x), evaluated against the target at step `horizon`.
    pub fn terminal(&self, horizon: usize, x: &DVector<f64>) -> f64 {
        let dx = x - self.target_at(horizon);
        0.5 * (dx.transpose() * &self.qf * &dx)[(0, 0)]
    }

    /// lx = dt * Q * (x - x̄_t)
    pub fn running_gradient_state(&self, t: usize, x: &DVector<f64>) -> DVector<f64> {
        &self.q_dt * (x - self.target_at(t))
    }

    /// lu = dt * R * u
    pub fn running_gradient_control(&self, u: &DVector<f64>) -> DVector<f64> {
        &self.r_dt * u
    }

    /// lxx = dt * Q
    pub fn running_hessian_state(&self) -> &DMatrix<f64> {
        &self.q_dt
    }

    /// luu = dt * R
    pub fn running_hessian_control(&self) -> &DMatrix<f64> {
        &self.r_dt
    }

    /// lf_x = Qf * (x - x̄_N)
    pub fn terminal_gradient(&self, horizon: usize, x: &DVector<f64>) -> DVector<f64> {
        &self.qf * (x - self.target_at(horizon))
    }

    /// lf_xx = Qf
    pub fn terminal_hessian(&self) -> &DMatrix<f64> {
        &self.qf
    }

    /// Total cost of a trajectory: sum of running costs plus terminal cost.
    pub fn trajectory(&self, states: &[DVector<f64>], controls: &[DVector<f64>]) -> f64 {
        let running: f64 = controls
            .iter()
            .enumerate()
            .map(|(t, u)| self.running(t, &states[t], u))
            .sum();
        running + self.terminal(controls.len(), &states[controls.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cost_2x1() -> QuadraticCost {
        let q = DMatrix::identity(2, 2);
        let r = DMatrix::identity(1, 1) * 0.5;
        let qf = DMatrix::identity(2, 2) * 10.0;
        QuadraticCost::new(q, r, qf, 0.1)
            .unwrap()
            .with_target(DVector::from_vec(vec![1.0, 0.0]))
    }

    #[test]
    fn running_and_terminal_values() {
        let cost = cost_2x1();
        let x = DVector::from_vec(vec![0.0, 0.0]);
        let u = DVector::from_vec(vec![2.0]);
        // 0.1 * 0.5 * (1.0 + 0.5 * 4.0)
        assert_abs_diff_eq!(cost.running(0, &x, &u), 0.15, epsilon = 1e-12);
        // 0.5 * 10.0 * 1.0
        assert_abs_diff_eq!(cost.terminal(20, &x), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let cost = cost_2x1();
        let x = DVector::from_vec(vec![0.3, -0.7]);
        let u = DVector::from_vec(vec![1.2]);
        let eps = 1e-6;

        let lx = cost.running_gradient_state(0, &x);
        for i in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += eps;
            xm[i] -= eps;
            let fd = (cost.running(0, &xp, &u) - cost.running(0, &xm, &u)) / (2.0 * eps);
            assert_abs_diff_eq!(lx[i], fd, epsilon = 1e-8);
        }

        let lu = cost.running_gradient_control(&u);
        let mut up = u.clone();
        let mut um = u.clone();
        up[0] += eps;
        um[0] -= eps;
        let fd = (cost.running(0, &x, &up) - cost.running(0, &x, &um)) / (2.0 * eps);
        assert_abs_diff_eq!(lu[0], fd, epsilon = 1e-8);
    }

    #[test]
    fn time_varying_target_indexes_per_step() {
        let targets = vec![
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![0.5, 0.0]),
            DVector::from_vec(vec![1.0, 0.0]),
        ];
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            0.1,
        )
        .unwrap()
        .with_target_sequence(targets)
        .unwrap();

        let x = DVector::from_vec(vec![0.5, 0.0]);
        let u = DVector::zeros(1);
        assert!(cost.running(1, &x, &u).abs() < 1e-12);
        assert!(cost.running(0, &x, &u) > 0.0);
    }

    #[test]
    fn rejects_empty_target_sequence() {
        let res = QuadraticCost::new(
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            0.1,
        )
        .unwrap()
        .with_target_sequence(Vec::new());
        assert!(matches!(
            res,
            Err(TrajOptError::DimensionMismatch {
                what: "target sequence length",
                ..
            })
        ));
    }

    #[test]
    fn rejects_asymmetric_q() {
        let mut q = DMatrix::identity(2, 2);
        q[(0, 1)] = 0.3;
        let res = QuadraticCost::new(
            q,
            DMatrix::identity(1, 1),
            DMatrix::identity(2, 2),
            0.1,
        );
        assert!(matches!(
            res,
            Err(TrajOptError::InvalidCostMatrix { what: "Q", .. })
        ));
    }

    #[test]
    fn rejects_indefinite_r() {
        let r = DMatrix::identity(1, 1) * -1.0;
        let res = QuadraticCost::new(
            DMatrix::identity(2, 2),
            r,
            DMatrix::identity(2, 2),
            0.1,
        );
        assert!(matches!(
            res,
            Err(TrajOptError::InvalidCostMatrix { what: "R", .. })
        ));
    }
}
