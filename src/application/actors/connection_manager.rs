//! Connection lifecycle: connect, heartbeat, bounded reconnection, disconnect.
//!
//! A manager owns at most one live transport. The transport is driven by a
//! dedicated task that pumps outbound frames and inbound events; every driver
//! is tagged with the connection epoch current when it started, and events
//! from a driver whose epoch is no longer current are dropped. Heartbeat and
//! reconnect timers are spawned tasks that `disconnect` aborts before it
//! returns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::application::actors::event_hub::{ConnectionEvent, EventCallbacks, EventHub};
use crate::config::{timer_period, ConnectionConfig};
use crate::domain::entities::connection::{ConnectionState, RetryState};
use crate::domain::errors::SyncError;
use crate::infrastructure::codec::{self, OutboundCommand};
use crate::infrastructure::transport::{Connector, Transport, TransportEvent, NORMAL_CLOSURE};

const STATE_CHANGE_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One applied state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Manual,
    Reconnect,
}

enum DriverCommand {
    Send(String),
    Close,
}

type ConnectOutcome = Shared<BoxFuture<'static, Result<(), SyncError>>>;

struct PendingConnect {
    id: u64,
    outcome: ConnectOutcome,
    task: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    retry: RetryState,
    manual_close: bool,
    epoch: u64,
    attempt_seq: u64,
    outbound: Option<mpsc::UnboundedSender<DriverCommand>>,
    driver_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    pending: Option<PendingConnect>,
}

struct ManagerCore {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    hub: EventHub,
    state_changes: broadcast::Sender<StateChangeEvent>,
    inner: Mutex<Inner>,
}

impl ManagerCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `next` if the edge is legal. Same-state requests are accepted as no-ops.
    fn transition(&self, inner: &mut Inner, next: ConnectionState) -> bool {
        let current = inner.state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!("Refusing illegal connection state transition {} -> {}", current, next);
            return false;
        }
        debug!("Connection state {} -> {}", current, next);
        inner.state = next;
        let _ = self.state_changes.send(StateChangeEvent {
            from_state: current,
            to_state: next,
        });
        true
    }

    fn emit_all(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            self.hub.emit(event);
        }
    }
}

/// Handle to the connection lifecycle. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    core: Arc<ManagerCore>,
}

impl ConnectionManager {
    /// A zero heartbeat interval is replaced by the default one.
    pub fn new(mut config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        config.heartbeat_interval = timer_period(
            "heartbeat_interval",
            config.heartbeat_interval,
            ConnectionConfig::default().heartbeat_interval,
        );
        let (state_changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        let retry = RetryState::new(config.max_reconnect_attempts, config.reconnect_interval);
        Self {
            core: Arc::new(ManagerCore {
                config,
                connector,
                hub: EventHub::new(),
                state_changes,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    retry,
                    manual_close: false,
                    epoch: 0,
                    attempt_seq: 0,
                    outbound: None,
                    driver_task: None,
                    heartbeat_task: None,
                    reconnect_task: None,
                    pending: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.core.config
    }

    /// Open the connection.
    ///
    /// Resolves once the transport is open. Calling while connected resolves
    /// immediately; calling while an attempt is in flight joins that attempt
    /// instead of opening a second transport. A manual connect resets the
    /// reconnect counter. A failed manual connect leaves the state at `Error`
    /// and schedules nothing.
    pub async fn connect(&self) -> Result<(), SyncError> {
        let outcome = {
            let mut inner = self.core.lock();
            if inner.state == ConnectionState::Connected {
                debug!("connect() called while already connected");
                return Ok(());
            }
            match &inner.pending {
                Some(pending) => {
                    debug!("connect() joining in-flight attempt {}", pending.id);
                    pending.outcome.clone()
                }
                None => {
                    if let Some(timer) = inner.reconnect_task.take() {
                        timer.abort();
                    }
                    inner.retry.reset();
                    inner.manual_close = false;
                    if !self.core.transition(&mut inner, ConnectionState::Connecting) {
                        return Err(SyncError::ConnectFailed(format!(
                            "cannot connect from state {}",
                            inner.state
                        )));
                    }
                    self.start_attempt(&mut inner, AttemptKind::Manual)
                }
            }
        };

        outcome.await
    }

    /// Close the connection on purpose.
    ///
    /// Cancels the heartbeat, any scheduled reconnect and any in-flight
    /// connect attempt, then closes the transport with a normal-closure code.
    /// No reconnection follows. Safe to call in any state.
    pub fn disconnect(&self) {
        let events = {
            let mut inner = self.core.lock();
            inner.manual_close = true;

            if let Some(task) = inner.heartbeat_task.take() {
                task.abort();
            }
            if let Some(task) = inner.reconnect_task.take() {
                task.abort();
            }
            let aborted_attempt = match inner.pending.take() {
                Some(pending) => {
                    pending.task.abort();
                    true
                }
                None => false,
            };

            if inner.state == ConnectionState::Disconnected && !aborted_attempt {
                return;
            }

            self.core.transition(&mut inner, ConnectionState::Closing);

            let had_transport = match inner.outbound.take() {
                Some(outbound) => {
                    let _ = outbound.send(DriverCommand::Close);
                    true
                }
                None => false,
            };
            // The driver finishes closing on its own; its late events are stale from here on.
            inner.driver_task.take();
            inner.epoch += 1;

            self.core.transition(&mut inner, ConnectionState::Disconnected);

            if had_transport {
                vec![ConnectionEvent::Closed {
                    code: Some(NORMAL_CLOSURE),
                }]
            } else {
                Vec::new()
            }
        };

        info!("Disconnected from {}", self.core.config.url);
        self.core.emit_all(events);
    }

    /// Queue `command` for sending. Returns `false`, with a warning, when not connected.
    pub fn send(&self, command: &OutboundCommand) -> bool {
        let inner = self.core.lock();
        if inner.state != ConnectionState::Connected {
            warn!(
                "Dropping {} command: connection is {}",
                command.kind(),
                inner.state
            );
            return false;
        }
        let Some(outbound) = inner.outbound.as_ref() else {
            warn!("Dropping {} command: no live transport", command.kind());
            return false;
        };

        let frame = codec::encode(command);
        match outbound.send(DriverCommand::Send(frame.text)) {
            Ok(()) => {
                debug!(
                    "Queued {} command (messageId {:?})",
                    command.kind(),
                    frame.message_id
                );
                true
            }
            Err(_) => {
                warn!("Dropping {} command: connection driver stopped", command.kind());
                false
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.core.lock().retry.attempts
    }

    /// True while a heartbeat or reconnect timer is armed.
    pub fn has_pending_timers(&self) -> bool {
        let inner = self.core.lock();
        let armed = |task: &Option<JoinHandle<()>>| task.as_ref().is_some_and(|t| !t.is_finished());
        armed(&inner.heartbeat_task) || armed(&inner.reconnect_task)
    }

    /// Every applied transition, in order.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.core.state_changes.subscribe()
    }

    /// Merge `callbacks` into the registered handlers.
    pub fn on(&self, callbacks: EventCallbacks) {
        self.core.hub.on(callbacks);
    }

    /// Event channel; replaces any previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.core.hub.subscribe()
    }

    fn start_attempt(&self, inner: &mut Inner, kind: AttemptKind) -> ConnectOutcome {
        inner.attempt_seq += 1;
        let id = inner.attempt_seq;

        let (tx, rx) = oneshot::channel();
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let result = manager.run_attempt(id, kind).await;
            let _ = tx.send(result);
        });

        let outcome = async move { rx.await.unwrap_or(Err(SyncError::ConnectionAborted)) }
            .boxed()
            .shared();
        inner.pending = Some(PendingConnect {
            id,
            outcome: outcome.clone(),
            task,
        });
        outcome
    }

    async fn run_attempt(self, id: u64, kind: AttemptKind) -> Result<(), SyncError> {
        let url = self.core.config.url.clone();
        let timeout = self.core.config.connect_timeout;
        info!("Connecting to {} (attempt {}, {:?})", url, id, kind);

        let opened = match url::Url::parse(&url) {
            Err(e) => Err(SyncError::from(e)),
            Ok(_) => match tokio::time::timeout(timeout, self.core.connector.open(&url)).await {
                Ok(Ok(transport)) => Ok(transport),
                Ok(Err(e)) => Err(SyncError::from(e)),
                Err(_) => Err(SyncError::ConnectTimeout(timeout)),
            },
        };

        match opened {
            Ok(transport) => self.handle_open(id, transport),
            Err(e) => self.handle_open_failure(id, kind, e),
        }
    }

    fn handle_open(&self, id: u64, mut transport: Box<dyn Transport>) -> Result<(), SyncError> {
        let ready = {
            let mut inner = self.core.lock();
            if inner.pending.as_ref().map(|p| p.id) != Some(id) {
                drop(inner);
                debug!("Attempt {} superseded, closing its transport", id);
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await;
                });
                return Err(SyncError::ConnectionAborted);
            }
            inner.pending = None;

            if let Some(stale) = inner.driver_task.take() {
                stale.abort();
            }
            inner.epoch += 1;
            let epoch = inner.epoch;

            let (outbound, commands) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            inner.outbound = Some(outbound.clone());
            inner.driver_task = Some(tokio::spawn(self.clone().drive(
                epoch,
                transport,
                commands,
                ready_rx,
            )));

            inner.retry.reset();
            inner.manual_close = false;
            self.core.transition(&mut inner, ConnectionState::Connected);

            if let Some(old) = inner.heartbeat_task.take() {
                old.abort();
            }
            inner.heartbeat_task = Some(tokio::spawn(heartbeat(
                outbound,
                self.core.config.heartbeat_interval,
            )));
            ready_tx
        };

        info!("Connected to {}", self.core.config.url);
        self.core.hub.emit(ConnectionEvent::Opened);
        // The driver holds inbound frames until `Opened` has been delivered.
        let _ = ready.send(());
        Ok(())
    }

    fn handle_open_failure(&self, id: u64, kind: AttemptKind, error: SyncError) -> Result<(), SyncError> {
        let events = {
            let mut inner = self.core.lock();
            if inner.pending.as_ref().map(|p| p.id) != Some(id) {
                return Err(error);
            }
            inner.pending = None;
            warn!("Connection attempt {} to {} failed: {}", id, self.core.config.url, error);

            let mut events = vec![ConnectionEvent::Errored {
                cause: error.to_string(),
            }];
            match kind {
                AttemptKind::Manual => {
                    self.core.transition(&mut inner, ConnectionState::Error);
                }
                AttemptKind::Reconnect => self.schedule_reconnect(&mut inner, &mut events),
            }
            events
        };

        self.core.emit_all(events);
        Err(error)
    }

    /// Count an unplanned close and either arm the reconnect timer or give up.
    fn schedule_reconnect(&self, inner: &mut Inner, events: &mut Vec<ConnectionEvent>) {
        if !inner.retry.record_unplanned_close() {
            warn!(
                "Giving up on {} after {} reconnect attempts",
                self.core.config.url, inner.retry.attempts
            );
            self.core.transition(inner, ConnectionState::Error);
            return;
        }

        let attempt = inner.retry.attempts;
        let delay = inner.retry.interval;
        self.core.transition(inner, ConnectionState::Reconnecting);
        info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.core.config.url, delay, attempt, inner.retry.max_attempts
        );

        if let Some(old) = inner.reconnect_task.take() {
            old.abort();
        }
        let manager = self.clone();
        inner.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.fire_reconnect();
        }));
        events.push(ConnectionEvent::Reconnecting { attempt });
    }

    fn fire_reconnect(&self) {
        let mut inner = self.core.lock();
        inner.reconnect_task = None;
        if inner.manual_close || inner.state != ConnectionState::Reconnecting || inner.pending.is_some() {
            debug!("Reconnect timer fired with nothing to do (state {})", inner.state);
            return;
        }
        // Progress is reported through events; the attempt runs on its own task.
        let _ = self.start_attempt(&mut inner, AttemptKind::Reconnect);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.core.lock().epoch == epoch
    }

    fn handle_frame(&self, epoch: u64, frame: &str) {
        if !self.is_current(epoch) {
            return;
        }
        if let Some(message) = codec::decode(frame) {
            self.core.hub.emit(ConnectionEvent::MessageReceived { message });
        }
    }

    fn handle_transport_error(&self, epoch: u64, cause: String) {
        if !self.is_current(epoch) {
            return;
        }
        warn!("Transport error on {}: {}", self.core.config.url, cause);
        self.core.hub.emit(ConnectionEvent::Errored { cause });
    }

    fn handle_close(&self, epoch: u64, code: Option<u16>) {
        let events = {
            let mut inner = self.core.lock();
            if inner.epoch != epoch {
                return;
            }
            inner.epoch += 1;
            inner.outbound = None;
            inner.driver_task.take();
            if let Some(task) = inner.heartbeat_task.take() {
                task.abort();
            }

            let mut events = vec![ConnectionEvent::Closed { code }];
            if inner.manual_close {
                self.core.transition(&mut inner, ConnectionState::Closing);
                self.core.transition(&mut inner, ConnectionState::Disconnected);
            } else {
                info!("Connection to {} closed unexpectedly (code {:?})", self.core.config.url, code);
                self.schedule_reconnect(&mut inner, &mut events);
            }
            events
        };

        self.core.emit_all(events);
    }

    async fn drive(
        self,
        epoch: u64,
        mut transport: Box<dyn Transport>,
        mut commands: mpsc::UnboundedReceiver<DriverCommand>,
        ready: oneshot::Receiver<()>,
    ) {
        let _ = ready.await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DriverCommand::Send(frame)) => {
                        if let Err(e) = transport.send(frame).await {
                            warn!("Failed to send frame: {}", e);
                        }
                    }
                    Some(DriverCommand::Close) | None => {
                        match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
                            Ok(Err(e)) => debug!("Error while closing transport: {}", e),
                            Err(_) => debug!("Transport close timed out"),
                            Ok(Ok(())) => {}
                        }
                        return;
                    }
                },
                event = transport.recv() => match event {
                    TransportEvent::Frame(frame) => self.handle_frame(epoch, &frame),
                    TransportEvent::Error(e) => self.handle_transport_error(epoch, e.to_string()),
                    TransportEvent::Closed { code } => {
                        self.handle_close(epoch, code);
                        return;
                    }
                },
            }
        }
    }
}

/// Liveness pings on a fixed interval. Send failures are logged and never change state.
async fn heartbeat(outbound: mpsc::UnboundedSender<DriverCommand>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let frame = codec::encode(&OutboundCommand::Heartbeat);
        if outbound.send(DriverCommand::Send(frame.text)).is_err() {
            warn!("Heartbeat not sent: connection driver stopped");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &self.core.config.url)
            .field("state", &inner.state)
            .field("reconnect_attempts", &inner.retry.attempts)
            .field("epoch", &inner.epoch)
            .finish()
    }
}
