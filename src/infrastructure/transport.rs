use async_trait::async_trait;

use crate::domain::errors::TransportError;

/// Close code used when the client closes the connection on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

/// What a transport yields when polled for input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Frame(String),
    /// A transport-level error. The transport may still deliver a close afterwards.
    Error(TransportError),
    /// The peer or the network ended the connection.
    Closed { code: Option<u16> },
}

/// One open, bidirectional text-frame connection.
///
/// A transport is owned by exactly one connection driver task and is never
/// shared; `recv` after `Closed` must keep returning `Closed`.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    async fn recv(&mut self) -> TransportEvent;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for transports. `open` resolves once the connection is established.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
