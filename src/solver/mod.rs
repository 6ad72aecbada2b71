mod backward;
mod forward;
mod ilqr;
mod options;

pub use backward::Gains;
pub use forward::Rollout;
pub use ilqr::{IlqrSolution, IterativeLinearQuadraticRegulator, SolveStatus, SolveSummary};
pub use options::IlqrOptions;
