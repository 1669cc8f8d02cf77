use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{timer_period, SimulationConfig};
use crate::domain::entities::metric::MetricClass;
use crate::domain::services::simulation::{tick, SimulationSnapshot};
use crate::domain::value_objects::statistic::{SimulatedStatistic, Statistic, ValueFormat};

/// Message for the simulation actor
pub enum SimulationMessage {
    /// Advance every metric once, outside the regular schedule
    TickNow,
    /// Stop the actor
    Shutdown,
}

/// Timer loop advancing the shared snapshot on a fixed interval
pub struct SimulationActor {
    snapshot: Arc<Mutex<SimulationSnapshot>>,
    enabled: Arc<AtomicBool>,
    tick_interval: Duration,
    rng: StdRng,
}

impl SimulationActor {
    pub fn new(
        snapshot: Arc<Mutex<SimulationSnapshot>>,
        enabled: Arc<AtomicBool>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            snapshot,
            enabled,
            tick_interval: timer_period(
                "tick_interval",
                tick_interval,
                SimulationConfig::default().tick_interval,
            ),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SimulationMessage>) {
        info!("Starting simulation ticker with interval {:?}", self.tick_interval);

        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.advance(),

                msg = rx.recv() => match msg {
                    Some(SimulationMessage::TickNow) => self.advance(),
                    Some(SimulationMessage::Shutdown) | None => {
                        info!("Simulation ticker stopped");
                        break;
                    }
                }
            }
        }
    }

    fn advance(&mut self) {
        // A tick that races with disabling is dropped.
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let mut snapshot = lock(&self.snapshot);
        let next = tick(&snapshot, &mut self.rng);
        *snapshot = next;
        debug!("Simulation tick advanced {} metrics", snapshot.len());
    }
}

struct Ticker {
    tx: mpsc::UnboundedSender<SimulationMessage>,
    task: JoinHandle<()>,
}

/// Simulation engine: shared metric state, the read path, and the on/off switch.
///
/// Enabling starts the tick timer; disabling stops it. Timers need a Tokio
/// runtime: enabling outside one only flips the flag.
pub struct SimulationEngine {
    config: SimulationConfig,
    snapshot: Arc<Mutex<SimulationSnapshot>>,
    enabled: Arc<AtomicBool>,
    ticker: Mutex<Option<Ticker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulationEngine {
    pub fn new(mut config: SimulationConfig) -> Self {
        config.tick_interval = timer_period(
            "tick_interval",
            config.tick_interval,
            SimulationConfig::default().tick_interval,
        );
        Self {
            config,
            snapshot: Arc::new(Mutex::new(SimulationSnapshot::new())),
            enabled: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// True while the tick timer task is alive.
    pub fn is_ticking(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|t| !t.task.is_finished())
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!("Simulation {}", if enabled { "enabled" } else { "disabled" });
        }
        if enabled {
            self.start_ticker();
        } else {
            self.stop_ticker();
        }
    }

    /// Advance every metric once, right now.
    pub fn tick_now(&self) {
        let mut snapshot = lock(&self.snapshot);
        let next = tick(&snapshot, &mut rand::thread_rng());
        *snapshot = next;
    }

    /// Copy of the current metric state.
    pub fn snapshot(&self) -> SimulationSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Server-supplied value for `key`; it becomes the current value until the next tick.
    pub fn apply_authoritative(&self, key: &str, value: f64) {
        lock(&self.snapshot).apply_authoritative(key, value);
    }

    /// Read path: registers unseen metrics and overlays simulated values.
    ///
    /// A statistic passes through untouched when simulation is off, when its
    /// value is the authoritative sentinel, or when it holds no number.
    /// Otherwise its value is the simulated number rendered in the source
    /// string's unit convention, tagged with the last trend.
    pub fn modified_statistics(&self, statistics: &[Statistic]) -> Vec<SimulatedStatistic> {
        let enabled = self.is_enabled();
        let mut snapshot = lock(&self.snapshot);

        statistics
            .iter()
            .map(|stat| {
                let Some((observed, format)) = ValueFormat::parse(&stat.value) else {
                    return SimulatedStatistic::passthrough(stat);
                };

                let metric = snapshot.observe(&stat.title, observed);
                if !enabled || stat.value.trim() == self.config.authoritative_sentinel {
                    return SimulatedStatistic::passthrough(stat);
                }

                let decimals = MetricClass::from_title(&stat.title).default_decimals();
                SimulatedStatistic {
                    title: stat.title.clone(),
                    value: format.render(metric.current_value, decimals),
                    trend: Some(metric.last_trend),
                }
            })
            .collect()
    }

    /// Stop the tick timer for good; the enabled flag is left as is.
    pub fn shutdown(&self) {
        self.stop_ticker();
    }

    fn start_ticker(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Simulation ticker not started, no runtime: {}", e);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SimulationActor::new(
            self.snapshot.clone(),
            self.enabled.clone(),
            self.config.tick_interval,
        );
        let task = handle.spawn(actor.run(rx));
        *ticker = Some(Ticker { tx, task });
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = lock(&self.ticker).take() {
            let _ = ticker.tx.send(SimulationMessage::Shutdown);
            ticker.task.abort();
        }
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("enabled", &self.is_enabled())
            .field("metrics", &lock(&self.snapshot).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::metric::Trend;

    fn fast_config() -> SimulationConfig {
        SimulationConfig {
            tick_interval: Duration::from_millis(20),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_disabled_engine_passes_values_through() {
        let engine = SimulationEngine::new(fast_config());
        let stats = vec![Statistic::new("Zone Temp", "22°C")];

        let out = engine.modified_statistics(&stats);
        assert_eq!(out, vec![SimulatedStatistic::passthrough(&stats[0])]);
        assert!(engine.snapshot().contains("Zone Temp"));
    }

    #[test]
    fn test_sentinel_and_text_values_pass_through() {
        let engine = SimulationEngine::new(fast_config());
        engine.set_enabled(true);
        let stats = vec![
            Statistic::new("Chiller Status", "LIVE"),
            Statistic::new("Operating Mode", "Eco"),
        ];

        let out = engine.modified_statistics(&stats);
        assert_eq!(out[0], SimulatedStatistic::passthrough(&stats[0]));
        assert_eq!(out[1], SimulatedStatistic::passthrough(&stats[1]));
        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn test_numeric_sentinel_is_registered_but_not_simulated() {
        let engine = SimulationEngine::new(SimulationConfig {
            authoritative_sentinel: "0".to_string(),
            ..fast_config()
        });
        engine.set_enabled(true);
        let stats = vec![Statistic::new("Active Alerts", "0")];

        let out = engine.modified_statistics(&stats);
        assert_eq!(out[0], SimulatedStatistic::passthrough(&stats[0]));
        assert!(engine.snapshot().contains("Active Alerts"));
    }

    #[tokio::test]
    async fn test_zero_tick_interval_falls_back_to_default() {
        let engine = SimulationEngine::new(SimulationConfig {
            tick_interval: Duration::ZERO,
            ..SimulationConfig::default()
        });
        assert_eq!(engine.config().tick_interval, Duration::from_secs(3));

        engine.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.is_ticking());
        engine.shutdown();
    }

    #[test]
    fn test_first_read_renders_observed_value_with_trend() {
        let engine = SimulationEngine::new(fast_config());
        engine.set_enabled(true);

        let out = engine.modified_statistics(&[Statistic::new("Zone Temp", "22°C")]);
        assert_eq!(out[0].value, "22.0°C");
        assert_eq!(out[0].trend, Some(Trend::Stable));
    }

    #[test]
    fn test_suffix_survives_ticks() {
        let engine = SimulationEngine::new(fast_config());
        engine.set_enabled(true);
        let stats = vec![
            Statistic::new("Zone Temp", "22°C"),
            Statistic::new("Energy Consumption", "1,250 kWh"),
            Statistic::new("Occupancy Rate", "64%"),
        ];
        engine.modified_statistics(&stats);

        for _ in 0..25 {
            engine.tick_now();
        }

        let out = engine.modified_statistics(&stats);
        assert!(out[0].value.ends_with("°C"), "got {}", out[0].value);
        assert!(out[1].value.ends_with(" kWh"), "got {}", out[1].value);
        assert!(out[2].value.ends_with('%'), "got {}", out[2].value);
        assert!(out.iter().all(|s| s.trend.is_some()));
    }

    #[test]
    fn test_authoritative_value_overrides_simulation() {
        let engine = SimulationEngine::new(fast_config());
        engine.set_enabled(true);
        engine.modified_statistics(&[Statistic::new("Zone Temp", "22°C")]);

        engine.apply_authoritative("Zone Temp", 24.5);

        let out = engine.modified_statistics(&[Statistic::new("Zone Temp", "22°C")]);
        assert_eq!(out[0].value, "24.5°C");
        assert_eq!(out[0].trend, Some(Trend::Up));
        assert_eq!(engine.snapshot().get("Zone Temp").map(|m| m.base_value), Some(22.0));
    }

    #[tokio::test]
    async fn test_ticker_advances_and_stops() {
        let engine = SimulationEngine::new(fast_config());
        engine.modified_statistics(&[Statistic::new("Zone Temp", "22°C")]);
        engine.set_enabled(true);
        assert!(engine.is_ticking());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let moved = engine.snapshot();
        let value = moved.get("Zone Temp").map(|m| m.current_value).unwrap_or_default();
        assert!((17.0..=27.0).contains(&value));
        assert_ne!(value, 22.0);

        engine.set_enabled(false);
        assert!(!engine.is_ticking());
        let frozen = engine.snapshot();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(engine.snapshot(), frozen);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_flag_and_stops_timer() {
        let engine = SimulationEngine::new(fast_config());
        engine.set_enabled(true);
        engine.shutdown();
        assert!(engine.is_enabled());
        assert!(!engine.is_ticking());
    }
}
