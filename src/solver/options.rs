use serde::{Deserialize, Serialize};

use crate::error::TrajOptError;

/// Hyperparameters of the iLQR driver.
///
/// Defaults follow the values used for the contact-rich scenarios this
/// solver was built for (line-search shrink 0.5, initial regularization
/// 1e-2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IlqrOptions {
    /// Outer iteration cap. Reaching it is not an error; the best
    /// trajectory found so far is returned.
    pub max_iterations: usize,
    /// Backtracking shrink factor beta, 0 < beta < 1.
    pub line_search_shrink: f64,
    /// Backtracking budget per forward pass.
    pub max_line_search_steps: usize,
    /// Initial regularization delta, >= 0. Zero is allowed and gives the
    /// first backward pass an unregularized Quu.
    pub initial_regularization: f64,
    /// Decay factor gamma applied after every accepted iteration:
    /// reg = max(reg * gamma, min_regularization). Setting gamma = 0
    /// collapses regularization to the floor after the first accepted
    /// iteration and keeps it there until the next failure.
    pub regularization_decay: f64,
    /// Multiplicative growth applied when a backward or forward pass fails.
    pub regularization_growth: f64,
    /// Lower bound the decay schedule cannot cross.
    pub min_regularization: f64,
    /// Give up and return the best trajectory so far once growth would
    /// exceed this cap.
    pub max_regularization: f64,
    /// Converged when the accepted cost decrease drops below this.
    pub abs_cost_tolerance: f64,
    /// Converged when the accepted cost decrease relative to the current
    /// cost drops below this.
    pub rel_cost_tolerance: f64,
}

impl Default for IlqrOptions {
    fn default() -> IlqrOptions {
        IlqrOptions {
            max_iterations: 100,
            line_search_shrink: 0.5,
            max_line_search_steps: 20,
            initial_regularization: 1e-2,
            regularization_decay: 0.5,
            regularization_growth: 10.0,
            min_regularization: 1e-9,
            max_regularization: 1e10,
            abs_cost_tolerance: 1e-6,
            rel_cost_tolerance: 1e-5,
        }
    }
}

impl IlqrOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> IlqrOptions {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_line_search_shrink(mut self, beta: f64) -> IlqrOptions {
        self.line_search_shrink = beta;
        self
    }

    /// Set delta and gamma together, the way the solve is usually tuned.
    pub fn with_regularization(mut self, delta: f64, gamma: f64) -> IlqrOptions {
        self.initial_regularization = delta;
        self.regularization_decay = gamma;
        self
    }

    pub fn with_tolerances(mut self, abs: f64, rel: f64) -> IlqrOptions {
        self.abs_cost_tolerance = abs;
        self.rel_cost_tolerance = rel;
        self
    }

    pub fn validate(&self) -> Result<(), TrajOptError> {
        if self.max_iterations == 0 {
            return Err(TrajOptError::InvalidOptions {
                what: "max_iterations",
                reason: "must be at least 1",
            });
        }
        if !(self.line_search_shrink > 0.0 && self.line_search_shrink < 1.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "line_search_shrink",
                reason: "must be in (0, 1)",
            });
        }
        if self.max_line_search_steps == 0 {
            return Err(TrajOptError::InvalidOptions {
                what: "max_line_search_steps",
                reason: "must be at least 1",
            });
        }
        if !(self.initial_regularization >= 0.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "initial_regularization",
                reason: "must be non-negative",
            });
        }
        if !(self.regularization_decay >= 0.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "regularization_decay",
                reason: "must be non-negative",
            });
        }
        if !(self.regularization_growth > 1.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "regularization_growth",
                reason: "must be greater than 1",
            });
        }
        if !(self.min_regularization >= 0.0 && self.max_regularization > self.min_regularization) {
            return Err(TrajOptError::InvalidOptions {
                what: "min_regularization",
                reason: "need 0 <= min < max",
            });
        }
        if !(self.abs_cost_tolerance >= 0.0 && self.rel_cost_tolerance >= 0.0) {
            return Err(TrajOptError::InvalidOptions {
                what: "cost tolerances",
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}
