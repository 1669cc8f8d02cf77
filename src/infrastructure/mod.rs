pub mod codec;
pub mod transport;
pub mod websocket_transport;

pub use transport::{Connector, Transport, TransportEvent};
pub use websocket_transport::WebSocketConnector;
