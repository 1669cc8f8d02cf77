pub mod statistic;
pub mod telemetry_message;

pub use statistic::{SimulatedStatistic, Statistic, UnitSuffix, ValueFormat};
pub use telemetry_message::{Origin, TelemetryMessage};
