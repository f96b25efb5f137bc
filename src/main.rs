use anyhow::Result;
use elektra::auth::{AuthManager, CasLoginClient};
use elektra::config::Config;
use elektra::coordinator::FetchCoordinator;
use elektra::dip::{DipClient, TariffFeedFetcher};
use elektra::mqtt::{MqttPublisher, StatePublisher};
use elektra::orchestrator::Orchestrator;
use elektra::pnd::PndClient;
use elektra::session::{CredentialsProvider, SessionStore};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;

    elektra::logging::init_logging(&config.logging)?;

    info!("Elektra CEZ PND bridge {} starting up", env!("APP_VERSION"));
    info!(
        "Polling {} electrometer(s) every {}s, MQTT broker {}:{}",
        config.meters.len(),
        config.polling.poll_interval_seconds,
        config.mqtt.host,
        config.mqtt.port
    );

    let auth = AuthManager::new(
        CredentialsProvider::new(config.cez.clone()),
        SessionStore::new(&config.session.state_file, config.session.ttl_hours),
        Arc::new(CasLoginClient::new()?),
    );

    let coordinator = FetchCoordinator::new(
        Arc::new(PndClient::new()?),
        config.polling.max_retries,
        config.polling.retry_base_delay_seconds,
    );

    // The tariff client is only built when some meter has an EAN configured
    let tariff_fetcher: Option<Arc<dyn TariffFeedFetcher>> =
        if config.meters.iter().any(|m| !m.ean.is_empty()) {
            Some(Arc::new(DipClient::new()?))
        } else {
            None
        };

    let publisher = Arc::new(MqttPublisher::new(&config.mqtt, config.meters.clone())?);

    let orchestrator = Orchestrator::new(
        &config,
        auth,
        coordinator,
        tariff_fetcher,
        publisher.clone(),
    );

    let mut exit: Result<()> = Ok(());
    tokio::select! {
        result = orchestrator.run_loop() => {
            if let Err(e) = result {
                error!("Orchestrator failed: {}", e);
                exit = Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Announce offline and close the broker connection before exiting
    if let Err(e) = publisher.stop().await {
        error!("MQTT shutdown failed: {}", e);
    }

    exit
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
