use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::application::actors::connection_manager::{ConnectionManager, StateChangeEvent};
use crate::application::actors::event_hub::{ConnectionEvent, EventCallbacks, MessageHandler};
use crate::application::actors::simulation_actor::SimulationEngine;
use crate::config::SyncConfig;
use crate::domain::entities::connection::ConnectionState;
use crate::domain::errors::SyncError;
use crate::domain::services::simulation::SimulationSnapshot;
use crate::domain::value_objects::statistic::{SimulatedStatistic, Statistic};
use crate::domain::value_objects::telemetry_message::TelemetryMessage;
use crate::infrastructure::codec::OutboundCommand;
use crate::infrastructure::transport::Connector;
use crate::persistence::preferences::{PreferenceStore, SIMULATION_ENABLED_KEY};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Application-scoped entry point: one connection manager and one simulation
/// engine, wired together.
///
/// Construct once at startup, share by reference, and call [`shutdown`](Self::shutdown)
/// when the application stops.
///
/// Server pushes are reconciled into the simulation: numeric entries of a
/// push's `metrics` object become the current value of the metric with that
/// title, and simulation resumes from there on the next tick.
pub struct TelemetrySync {
    connection: ConnectionManager,
    simulation: Arc<SimulationEngine>,
    preferences: Arc<dyn PreferenceStore>,
    last_message: Arc<Mutex<Option<TelemetryMessage>>>,
    consumer_on_message: Arc<Mutex<Option<MessageHandler>>>,
}

impl TelemetrySync {
    /// Validate `config`, restore the simulation preference and start the
    /// simulation timer if enabled. Does not connect.
    pub async fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let connection = ConnectionManager::new(config.connection.clone(), connector);
        let simulation = Arc::new(SimulationEngine::new(config.simulation.clone()));
        let last_message = Arc::new(Mutex::new(None));
        let consumer_on_message: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        let enabled = match preferences.load_bool(SIMULATION_ENABLED_KEY).await {
            Ok(Some(enabled)) => enabled,
            Ok(None) => config.simulation.enabled_by_default,
            Err(e) => {
                warn!("Failed to load simulation preference, using default: {}", e);
                config.simulation.enabled_by_default
            }
        };
        simulation.set_enabled(enabled);

        let engine = simulation.clone();
        let latest = last_message.clone();
        let consumer = consumer_on_message.clone();
        connection.on(EventCallbacks::new().on_message(move |message| {
            if message.is_server_origin() {
                for (title, value) in message.metric_values() {
                    engine.apply_authoritative(&title, value);
                }
                *lock(&latest) = Some(message.clone());
            } else {
                debug!("Ignoring client-origin echo for {}/{}", message.floor, message.unit);
            }

            let handler = lock(&consumer).clone();
            if let Some(handler) = handler {
                handler(message);
            }
        }));

        info!(
            "Telemetry sync ready for {} (simulation {})",
            config.connection.url,
            if enabled { "on" } else { "off" }
        );

        Ok(Self {
            connection,
            simulation,
            preferences,
            last_message,
            consumer_on_message,
        })
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        self.connection.connect().await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    /// Most recent server-origin message.
    pub fn last_message(&self) -> Option<TelemetryMessage> {
        lock(&self.last_message).clone()
    }

    pub fn send_filter_update(&self, floor: &str, unit: &str) -> bool {
        self.connection.send(&OutboundCommand::FilterUpdate {
            floor: floor.to_string(),
            unit: unit.to_string(),
        })
    }

    pub fn send_confirmation(&self, floor: &str, unit: &str) -> bool {
        self.connection.send(&OutboundCommand::Confirmation {
            floor: floor.to_string(),
            unit: unit.to_string(),
        })
    }

    pub fn send_device_control(&self, asset: &str, status: &str, value: Option<&str>) -> bool {
        self.connection.send(&OutboundCommand::DeviceControl {
            asset: asset.to_string(),
            status: status.to_string(),
            value: value.map(str::to_string),
        })
    }

    pub fn modified_statistics(&self, statistics: &[Statistic]) -> Vec<SimulatedStatistic> {
        self.simulation.modified_statistics(statistics)
    }

    pub fn simulation_snapshot(&self) -> SimulationSnapshot {
        self.simulation.snapshot()
    }

    pub fn is_simulation_enabled(&self) -> bool {
        self.simulation.is_enabled()
    }

    /// Toggle the simulation and persist the choice.
    ///
    /// The toggle takes effect even when persisting fails; the error reports
    /// that the choice will not survive a restart.
    pub async fn set_simulation_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.simulation.set_enabled(enabled);
        self.preferences
            .save_bool(SIMULATION_ENABLED_KEY, enabled)
            .await
            .map_err(|e| {
                warn!("Failed to persist simulation preference: {}", e);
                SyncError::Persistence(e.to_string())
            })
    }

    /// Merge consumer callbacks. The message handler runs after the
    /// façade's own bookkeeping for each inbound message.
    pub fn on(&self, mut callbacks: EventCallbacks) {
        if let Some(handler) = callbacks.take_message_handler() {
            *lock(&self.consumer_on_message) = Some(handler);
        }
        self.connection.on(callbacks);
    }

    /// Event channel; replaces any previous subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    pub fn state_changes(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.connection.state_changes()
    }

    /// Disconnect and stop every timer this façade owns.
    pub fn shutdown(&self) {
        info!("Shutting down telemetry sync");
        self.connection.disconnect();
        self.simulation.shutdown();
    }
}

impl std::fmt::Debug for TelemetrySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySync")
            .field("connection", &self.connection)
            .field("simulation", &self.simulation)
            .finish()
    }
}
