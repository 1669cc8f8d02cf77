use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::domain::errors::TransportError;
use crate::infrastructure::transport::{Connector, Transport, TransportEvent};

pub type TelemetryWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections with tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!("WebSocket handshake with {} completed: {}", url, response.status());
        Ok(Box::new(WebSocketTransport::new(stream)))
    }
}

/// A tungstenite stream behind the [`Transport`] seam.
pub struct WebSocketTransport {
    stream: TelemetryWsStream,
    closed: bool,
}

impl WebSocketTransport {
    pub fn new(stream: TelemetryWsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed { code: None };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Frame(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return TransportEvent::Frame(text),
                    Err(e) => debug!("Ignoring non-UTF-8 binary frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    return TransportEvent::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    };
                }
                // tungstenite queues the pong reply itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    // The stream is unusable after an error; the next recv reports the close.
                    self.closed = true;
                    return match TransportError::from(e) {
                        TransportError::Closed => TransportEvent::Closed { code: None },
                        other => TransportEvent::Error(other),
                    };
                }
                None => {
                    self.closed = true;
                    return TransportEvent::Closed { code: None };
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from(e) {
                TransportError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}
