// Drive a 1-D double integrator to position 1.0 and dump the optimized
// trajectory to CSV.

use std::error::Error;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use trajopt::models::DoubleIntegrator;
use trajopt::{IlqrOptions, IterativeLinearQuadraticRegulator, QuadraticCost};

#[derive(Serialize)]
struct Row {
    time: f64,
    position: f64,
    velocity: f64,
    control: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let dt = 0.1;
    let horizon = 20;

    let cost = QuadraticCost::new(
        DMatrix::identity(2, 2),
        DMatrix::identity(1, 1) * 0.01,
        DMatrix::identity(2, 2) * 100.0,
        dt,
    )?
    .with_target(DVector::from_vec(vec![1.0, 0.0]));

    let mut solver = IterativeLinearQuadraticRegulator::new(
        DoubleIntegrator::new(dt),
        cost,
        IlqrOptions::default(),
    )?;

    let solution = solver.solve(&DVector::zeros(2), &DMatrix::zeros(1, horizon))?;

    println!(
        "solved in {:?} ({} iterations, status {:?}), final cost {:.6e}",
        solution.solve_time, solution.iterations, solution.status, solution.final_cost
    );

    let mut writer = csv::Writer::from_path("double_integrator_trajectory.csv")?;
    for t in 0..=horizon {
        writer.serialize(Row {
            time: t as f64 * dt,
            position: solution.states[(0, t)],
            velocity: solution.states[(1, t)],
            control: if t < horizon {
                solution.controls[(0, t)]
            } else {
                0.0
            },
        })?;
    }
    writer.flush()?;

    Ok(())
}
