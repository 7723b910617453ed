//! ECU Link Daemon - Main Entry Point

use ecu_session::{init_logging, EcuConfig, EcuEvent, EcuService};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("=== ECU Link v{} ===", env!("CARGO_PKG_VERSION"));

    let config = EcuConfig::from_env()?;
    if config.safety_mode {
        info!("safety mode enabled - tuning writes are blocked");
    } else {
        info!("performance mode - tuning writes allowed");
    }

    let service = EcuService::new(config);
    let mut events = service.subscribe();
    service.connect().await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down gracefully");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "event stream lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    service.disconnect().await;
    Ok(())
}

fn log_event(event: &EcuEvent) {
    match event {
        EcuEvent::Connected => info!("ECU connected"),
        EcuEvent::Disconnected => info!("ECU disconnected"),
        EcuEvent::Error { message } => error!(%message, "ECU error"),
        EcuEvent::Initialized(identity) => info!(vin = %identity.vin, "vehicle initialized"),
        EcuEvent::Data(reading) => {
            debug!(decoded = reading.decoded_count(), "live reading")
        }
        EcuEvent::SafetyAlert(alerts) => warn!(?alerts, "safety alerts"),
        EcuEvent::ParameterWritten { address, value, .. } => {
            info!(address, value, "parameter written")
        }
    }
}
