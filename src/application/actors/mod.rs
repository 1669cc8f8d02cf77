pub mod connection_manager;
pub mod event_hub;
pub mod simulation_actor;

#[cfg(test)]
pub mod tests;

pub use connection_manager::{ConnectionManager, StateChangeEvent};
pub use event_hub::{ConnectionEvent, EventCallbacks, EventHub};
pub use simulation_actor::{SimulationActor, SimulationEngine, SimulationMessage};
