//! Concrete [`Dynamics`] implementations used by tests, benches and demos.
//!
//! These stand in for the external physics engine; a real deployment wraps
//! its simulator handle in the same trait.

use nalgebra::{DMatrix, DVector};

use crate::dynamics::Dynamics;
use crate::error::TrajOptError;

/// Exactly linear dynamics x_next = A x + B u, with analytic Jacobians.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    dt: f64,
}

impl LinearSystem {
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, dt: f64) -> LinearSystem {
        assert_eq!(a.nrows(), a.ncols());
        assert_eq!(a.nrows(), b.nrows());
        LinearSystem { a, b, dt }
    }
}

impl Dynamics for LinearSystem {
    fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    fn control_dim(&self) -> usize {
        self.b.ncols()
    }

    fn timestep(&self) -> f64 {
        self.dt
    }

    fn step(&mut self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, TrajOptError> {
        Ok(&self.a * x + &self.b * u)
    }

    fn linearize(
        &mut self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TrajOptError> {
        Ok((self.a.clone(), self.b.clone()))
    }
}

/// 1-D double integrator: state [position, velocity], control [acceleration].
///
/// Semi-implicit Euler, the integrator most game-physics engines use:
/// v' = v + u*dt, p' = p + v'*dt. Jacobians come from the default
/// finite-difference path on purpose, so the solver is exercised the same
/// way it is against a black-box simulator.
#[derive(Debug, Clone)]
pub struct DoubleIntegrator {
    dt: f64,
}

impl DoubleIntegrator {
    pub fn new(dt: f64) -> DoubleIntegrator {
        DoubleIntegrator { dt }
    }
}

impl Dynamics for DoubleIntegrator {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn timestep(&self) -> f64 {
        self.dt
    }

    fn step(&mut self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, TrajOptError> {
        let v_next = x[1] + u[0] * self.dt;
        let p_next = x[0] + v_next * self.dt;
        Ok(DVector::from_vec(vec![p_next, v_next]))
    }
}

/// Cart-pole: state [cart position, pole angle, cart velocity, pole angular
/// velocity], control [horizontal force on the cart]. The angle is measured
/// from the downward rest position, so the upright target is theta = pi.
#[derive(Debug, Clone)]
pub struct CartPole {
    pub cart_mass: f64,
    pub pole_mass: f64,
    pub pole_length: f64,
    pub gravity: f64,
    dt: f64,
}

impl CartPole {
    pub fn new(dt: f64) -> CartPole {
        CartPole {
            cart_mass: 1.0,
            pole_mass: 0.1,
            pole_length: 0.5,
            gravity: 9.81,
            dt,
        }
    }
}

impl Dynamics for CartPole {
    fn state_dim(&self) -> usize {
        4
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn timestep(&self) -> f64 {
        self.dt
    }

    fn step(&mut self, x: &DVector<f64>, u: &DVector<f64>) -> Result<DVector<f64>, TrajOptError> {
        let (mc, mp, l, g) = (self.cart_mass, self.pole_mass, self.pole_length, self.gravity);
        let theta = x[1];
        let x_dot = x[2];
        let theta_dot = x[3];
        let f = u[0];

        let s = theta.sin();
        let c = theta.cos();
        let denom = mc + mp * s * s;

        // point-mass pole, angle from the downward vertical
        let x_ddot = (f + mp * s * (l * theta_dot * theta_dot + g * c)) / denom;
        let theta_ddot =
            (-f * c - mp * l * theta_dot * theta_dot * c * s - (mc + mp) * g * s) / (l * denom);

        let x_dot_next = x_dot + x_ddot * self.dt;
        let theta_dot_next = theta_dot + theta_ddot * self.dt;
        let next = DVector::from_vec(vec![
            x[0] + x_dot_next * self.dt,
            theta + theta_dot_next * self.dt,
            x_dot_next,
            theta_dot_next,
        ]);

        if next.iter().all(|v| v.is_finite()) {
            Ok(next)
        } else {
            Err(TrajOptError::SimulationFailure)
        }
    }
}
