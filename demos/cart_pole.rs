// Cart-pole swing-up: start just off the upright, settle on it. Weights
// follow the usual cart-pole benchmark setup.

use std::error::Error;
use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use trajopt::models::CartPole;
use trajopt::{IlqrOptions, IterativeLinearQuadraticRegulator, QuadraticCost};

#[derive(Serialize)]
struct Row {
    time: f64,
    cart_position: f64,
    pole_angle: f64,
    cart_velocity: f64,
    pole_velocity: f64,
    force: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let dt = 1e-2;
    let total_time = 1.0;
    let horizon = (total_time / dt) as usize;

    let x0 = DVector::from_vec(vec![0.0, PI - 0.2, 0.0, 0.0]);
    let x_nom = DVector::from_vec(vec![0.0, PI, 0.0, 0.0]);

    let q = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, 0.01, 0.01]));
    let r = DMatrix::identity(1, 1) * 0.001;
    let qf = DMatrix::from_diagonal(&DVector::from_vec(vec![100.0, 100.0, 10.0, 10.0]));

    let cost = QuadraticCost::new(q, r, qf, dt)?.with_target(x_nom);

    let options = IlqrOptions::default()
        .with_line_search_shrink(0.9)
        .with_max_iterations(200);

    let mut solver =
        IterativeLinearQuadraticRegulator::new(CartPole::new(dt), cost, options)?;

    let solution = solver.solve(&x0, &DMatrix::zeros(1, horizon))?;

    println!(
        "solved in {:?} ({} iterations, status {:?}), final cost {:.6e}",
        solution.solve_time, solution.iterations, solution.status, solution.final_cost
    );
    println!(
        "final pole angle: {:.4} rad (target {:.4})",
        solution.states[(1, horizon)],
        PI
    );

    let mut writer = csv::Writer::from_path("cart_pole_trajectory.csv")?;
    for t in 0..=horizon {
        writer.serialize(Row {
            time: t as f64 * dt,
            cart_position: solution.states[(0, t)],
            pole_angle: solution.states[(1, t)],
            cart_velocity: solution.states[(2, t)],
            pole_velocity: solution.states[(3, t)],
            force: if t < horizon {
                solution.controls[(0, t)]
            } else {
                0.0
            },
        })?;
    }
    writer.flush()?;

    Ok(())
}
