//! Texnouz OCPP Charge Point Emulator
//!
//! Connects the stations listed in the config to a central system and keeps
//! them online until SIGINT/SIGTERM.
//! Reads configuration from TOML file (~/.config/texnouz-emulator/config.toml).

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use texnouz_emulator::config::{config_path, AppConfig, LoggingConfig};
use texnouz_emulator::notifications::{create_event_bus, EventBusHandler};
use texnouz_emulator::shared::shutdown::ShutdownCoordinator;
use texnouz_emulator::ConnectionOrchestrator;

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let path = config_path();
    let app_cfg = match AppConfig::load(&path) {
        Ok(cfg) => {
            init_tracing(&cfg.logging);
            info!("Configuration loaded from {}", path.display());
            cfg
        }
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    info!("Starting Texnouz OCPP Charge Point Emulator...");
    info!(
        url = %app_cfg.central_system.url,
        stations = app_cfg.stations.len(),
        "Central system target"
    );

    // ── Event bus ──────────────────────────────────────────────
    let event_bus = create_event_bus();
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            debug!(
                event_type = message.event.event_type(),
                station_id = message.event.station_id(),
                "Station event"
            );
        }
    });

    let orchestrator = Arc::new(ConnectionOrchestrator::new(
        app_cfg.central_system.url.clone(),
        app_cfg.connection_defaults(),
        Arc::new(EventBusHandler::new(event_bus.clone())),
    ));

    // ── Shutdown coordination ──────────────────────────────────
    let shutdown = ShutdownCoordinator::new(app_cfg.shutdown_timeout());
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    // ── Bring stations online ──────────────────────────────────
    for settings in app_cfg.station_settings() {
        if shutdown_signal.is_triggered() {
            break;
        }
        let station_id = settings.station_id.clone();
        match orchestrator.add_station(settings).await {
            Ok(()) => info!(%station_id, "✅ Station online"),
            Err(e) => warn!(%station_id, error = %e, "Station failed to come online"),
        }
    }

    let pool = orchestrator.aggregate_stats();
    info!(
        total = pool.total,
        connected = pool.connected,
        "🚀 Emulator running. Press Ctrl+C to shutdown gracefully."
    );

    let pool_handle = orchestrator.clone();
    let completed = shutdown
        .shutdown_with_cleanup(|| async move {
            if let Err(e) = pool_handle.shutdown().await {
                warn!(error = %e, "Some stations did not disconnect cleanly");
            }
        })
        .await;

    if !completed {
        warn!("Forced exit before every station disconnected");
    }

    info!("👋 Texnouz OCPP Charge Point Emulator shutdown complete");
    Ok(())
}
