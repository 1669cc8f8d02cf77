pub mod telemetry_sync;

pub use telemetry_sync::TelemetrySync;
