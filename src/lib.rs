//! trajopt: iterative LQR trajectory optimization over black-box simulators
//!
//! - `Dynamics`: single-step interface to an external physics engine, with
//!   finite-difference linearization
//! - `QuadraticCost`: running + terminal cost with closed-form derivatives
//! - `IterativeLinearQuadraticRegulator`: the solver (regularized backward
//!   pass, backtracking forward pass)
//! - `models`: small analytic systems for tests, benches and demos

pub mod cost;
pub mod dynamics;
pub mod error;
pub mod models;
pub mod solver;

pub use cost::{QuadraticCost, Target};
pub use dynamics::Dynamics;
pub use error::TrajOptError;
pub use solver::{
    IlqrOptions, IlqrSolution, IterativeLinearQuadraticRegulator, SolveStatus, SolveSummary,
};
