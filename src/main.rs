use std::sync::Arc;
use std::time::Duration;

use facility_sync::domain::value_objects::statistic::Statistic;
use facility_sync::infrastructure::websocket_transport::WebSocketConnector;
use facility_sync::persistence::{
    init_database_with, InMemoryPreferenceStore, PreferenceStore, SqlitePreferenceStore,
};
use facility_sync::{ConnectionEvent, SyncConfig, TelemetrySync};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between simulated statistics samples written to the log.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

fn sample_statistics() -> Vec<Statistic> {
    vec![
        Statistic::new("Average Temperature", "22°C"),
        Statistic::new("Energy Consumption", "1,250 kWh"),
        Statistic::new("Active Alerts", "3"),
        Statistic::new("Occupancy", "148"),
        Statistic::new("HVAC Efficiency", "92%"),
        Statistic::new("Chiller Plant", "LIVE"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facility_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env();
    config.validate()?;
    info!("Facility telemetry sync starting against {}", config.connection.url);

    let preferences: Arc<dyn PreferenceStore> = match init_database_with(&config.database).await {
        Ok(pool) => Arc::new(SqlitePreferenceStore::new(pool)),
        Err(e) => {
            warn!("Preferences database unavailable ({}), preferences will not persist", e);
            Arc::new(InMemoryPreferenceStore::new())
        }
    };

    let sync = Arc::new(
        TelemetrySync::new(config, Arc::new(WebSocketConnector::new()), preferences).await?,
    );

    let mut events = sync.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::MessageReceived { message } => info!(
                    "Push for floor {} unit {}: {} extra fields",
                    message.floor,
                    message.unit,
                    message.extra.len()
                ),
                ConnectionEvent::Reconnecting { attempt } => {
                    warn!("Connection lost, reconnect attempt {}", attempt)
                }
                other => info!("Connection event: {}", other.name()),
            }
        }
    });

    if let Err(e) = sync.connect().await {
        error!("Initial connection failed: {}", e);
    }

    let sampler = {
        let sync = sync.clone();
        tokio::spawn(async move {
            let statistics = sample_statistics();
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                for stat in sync.modified_statistics(&statistics) {
                    info!(
                        "{}: {} ({})",
                        stat.title,
                        stat.value,
                        stat.trend.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
                info!(
                    "Connection {} (reconnect attempts {})",
                    sync.connection_state(),
                    sync.reconnect_attempts()
                );
            }
        })
    };

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    sampler.abort();
    sync.shutdown();
    info!("Facility telemetry sync stopped");

    Ok(())
}
