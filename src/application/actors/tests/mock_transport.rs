use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::actors::connection_manager::ConnectionManager;
use crate::application::actors::event_hub::ConnectionEvent;
use crate::config::ConnectionConfig;
use crate::domain::entities::connection::ConnectionState;
use crate::domain::errors::TransportError;
use crate::infrastructure::transport::{Connector, Transport, TransportEvent};

/// How the mock connector answers one `open` call.
#[derive(Debug, Clone)]
pub enum OpenPlan {
    Accept,
    Refuse(String),
    /// Accept after a delay.
    Delay(Duration),
    /// Never resolve.
    Hang,
}

/// Server-side view of one accepted mock transport.
#[derive(Clone)]
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn push_frame(&self, frame: &str) {
        let _ = self.inbound.send(TransportEvent::Frame(frame.to_string()));
    }

    pub fn push_error(&self, error: TransportError) {
        let _ = self.inbound.send(TransportEvent::Error(error));
    }

    /// Close from the server side.
    pub fn close(&self, code: Option<u16>) {
        let _ = self.inbound.send(TransportEvent::Closed { code });
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed { code: None };
        }
        match self.inbound.recv().await {
            Some(event) => {
                if matches!(event, TransportEvent::Closed { .. }) {
                    self.closed = true;
                }
                event
            }
            None => {
                self.closed = true;
                TransportEvent::Closed { code: None }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.closed_by_client.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted connector: answers `open` calls from a plan queue and records
/// every transport it constructs.
pub struct MockConnector {
    plans: Mutex<VecDeque<OpenPlan>>,
    default_plan: OpenPlan,
    opens: AtomicUsize,
    peers: Mutex<Vec<MockPeer>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_default(OpenPlan::Accept)
    }

    pub fn with_default(default_plan: OpenPlan) -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            default_plan,
            opens: AtomicUsize::new(0),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(plans: Vec<OpenPlan>) -> Self {
        let connector = Self::with_default(OpenPlan::Refuse("script exhausted".to_string()));
        connector.plans.lock().unwrap().extend(plans);
        connector
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        self.peers.lock().unwrap().get(index).cloned()
    }

    pub fn last_peer(&self) -> Option<MockPeer> {
        self.peers.lock().unwrap().last().cloned()
    }

    fn accept(&self) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed_by_client = Arc::new(AtomicBool::new(false));
        self.peers.lock().unwrap().push(MockPeer {
            inbound: tx,
            sent: sent.clone(),
            closed_by_client: closed_by_client.clone(),
        });
        Box::new(MockTransport {
            inbound: rx,
            sent,
            closed_by_client,
            closed: false,
        })
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_plan.clone());

        match plan {
            OpenPlan::Accept => Ok(self.accept()),
            OpenPlan::Refuse(reason) => Err(TransportError::Connect(reason)),
            OpenPlan::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept())
            }
            OpenPlan::Hang => std::future::pending().await,
        }
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("ws://mock.test/ws")
        .with_reconnect_interval(Duration::from_millis(30))
        .with_max_reconnect_attempts(3)
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_connect_timeout(Duration::from_millis(500))
}

pub fn manager_with(config: ConnectionConfig, connector: Arc<MockConnector>) -> ConnectionManager {
    ConnectionManager::new(config, connector)
}

/// Poll until the manager reaches `state`, or fail after `limit`.
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState, limit: Duration) {
    let result = tokio::time::timeout(limit, async {
        while manager.connection_state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {}, still {}",
        state,
        manager.connection_state()
    );
}

/// Next event from the subscriber channel, failing after one second.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

/// Poll until `peer` has recorded at least `count` frames.
pub async fn wait_for_sent(peer: &MockPeer, count: usize) -> Vec<String> {
    let result = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let sent = peer.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    result.expect("timed out waiting for sent frames")
}
