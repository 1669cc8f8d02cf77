//! Facility Telemetry Sync Library
//!
//! Real-time connection and synchronization core for facility telemetry: a
//! reconnecting WebSocket client, the wire codec, connection events, and an
//! in-process simulation engine that keeps dashboard metrics moving between
//! server updates.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;

pub use application::actors::{ConnectionEvent, ConnectionManager, EventCallbacks, SimulationEngine};
pub use application::services::TelemetrySync;
pub use config::{ConnectionConfig, SimulationConfig, SyncConfig};
pub use domain::entities::connection::ConnectionState;
pub use domain::errors::SyncError;
