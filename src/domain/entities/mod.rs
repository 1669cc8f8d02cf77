pub mod connection;
pub mod metric;

pub use connection::{ConnectionState, RetryState};
pub use metric::{MetricClass, SimulatedMetric, Trend};
