pub mod simulation;

pub use simulation::{tick, SimulationSnapshot};
