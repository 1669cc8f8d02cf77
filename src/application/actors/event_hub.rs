use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::value_objects::telemetry_message::TelemetryMessage;

/// Lifecycle events of the telemetry connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Closed { code: Option<u16> },
    Errored { cause: String },
    MessageReceived { message: TelemetryMessage },
    Reconnecting { attempt: u32 },
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Opened => "opened",
            ConnectionEvent::Closed { .. } => "closed",
            ConnectionEvent::Errored { .. } => "errored",
            ConnectionEvent::MessageReceived { .. } => "message",
            ConnectionEvent::Reconnecting { .. } => "reconnecting",
        }
    }
}

type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type CloseHandler = Arc<dyn Fn(Option<u16>) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;
pub(crate) type MessageHandler = Arc<dyn Fn(&TelemetryMessage) + Send + Sync>;
type ReconnectingHandler = Arc<dyn Fn(u32) + Send + Sync>;

/// One optional handler per event type.
///
/// Registering through [`EventHub::on`] merges slot by slot: a slot set here
/// replaces the registered one, an empty slot leaves it alone. There is at
/// most one handler per event; fan-out belongs in a wrapping layer.
#[derive(Clone, Default)]
pub struct EventCallbacks {
    on_open: Option<OpenHandler>,
    on_close: Option<CloseHandler>,
    on_error: Option<ErrorHandler>,
    on_message: Option<MessageHandler>,
    on_reconnecting: Option<ReconnectingHandler>,
}

impl EventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(handler));
        self
    }

    pub fn on_close(mut self, handler: impl Fn(Option<u16>) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn on_message(mut self, handler: impl Fn(&TelemetryMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(handler));
        self
    }

    pub fn on_reconnecting(mut self, handler: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_reconnecting = Some(Arc::new(handler));
        self
    }

    /// Detach the message handler, leaving the slot empty.
    pub(crate) fn take_message_handler(&mut self) -> Option<MessageHandler> {
        self.on_message.take()
    }

    fn merge(&mut self, other: EventCallbacks) {
        if other.on_open.is_some() {
            self.on_open = other.on_open;
        }
        if other.on_close.is_some() {
            self.on_close = other.on_close;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
        if other.on_message.is_some() {
            self.on_message = other.on_message;
        }
        if other.on_reconnecting.is_some() {
            self.on_reconnecting = other.on_reconnecting;
        }
    }

    fn dispatch(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                if let Some(handler) = &self.on_open {
                    handler();
                }
            }
            ConnectionEvent::Closed { code } => {
                if let Some(handler) = &self.on_close {
                    handler(*code);
                }
            }
            ConnectionEvent::Errored { cause } => {
                if let Some(handler) = &self.on_error {
                    handler(cause);
                }
            }
            ConnectionEvent::MessageReceived { message } => {
                if let Some(handler) = &self.on_message {
                    handler(message);
                }
            }
            ConnectionEvent::Reconnecting { attempt } => {
                if let Some(handler) = &self.on_reconnecting {
                    handler(*attempt);
                }
            }
        }
    }
}

impl fmt::Debug for EventCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_reconnecting", &self.on_reconnecting.is_some())
            .finish()
    }
}

/// Delivers connection events to the registered callbacks and to a single
/// channel subscriber.
///
/// Handlers run synchronously on the task that emits the event, in the order
/// the events occur, and never while connection state is locked.
#[derive(Default)]
pub struct EventHub {
    callbacks: Mutex<EventCallbacks>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `callbacks` into the registered set (overwrite, never append).
    pub fn on(&self, callbacks: EventCallbacks) {
        lock(&self.callbacks).merge(callbacks);
    }

    /// Drop every registered callback.
    pub fn clear(&self) {
        *lock(&self.callbacks) = EventCallbacks::default();
    }

    /// Open the event channel. A previous subscriber, if any, is replaced and
    /// its receiver sees the channel close.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.subscriber) = Some(tx);
        rx
    }

    pub fn emit(&self, event: ConnectionEvent) {
        let callbacks = lock(&self.callbacks).clone();
        callbacks.dispatch(&event);

        let mut subscriber = lock(&self.subscriber);
        if let Some(tx) = subscriber.as_ref() {
            if tx.send(event).is_err() {
                debug!("Event subscriber dropped, detaching");
                *subscriber = None;
            }
        }
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("callbacks", &*lock(&self.callbacks))
            .field("has_subscriber", &lock(&self.subscriber).is_some())
            .finish()
    }
}
