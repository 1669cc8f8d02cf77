// Connection manager tests run against a scripted in-memory transport.

pub mod mock_transport;

pub use mock_transport::{MockConnector, MockPeer, OpenPlan};
