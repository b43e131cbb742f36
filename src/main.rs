use ble_light_controller::bridge::Bridge;
use ble_light_controller::controller::LightController;
use ble_light_controller::domain::registry::ModelRegistry;
use ble_light_controller::domain::settings::SettingsService;
use ble_light_controller::infrastructure::bluetooth::BtleTransport;
use ble_light_controller::infrastructure::logging;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Reads `topic payload` lines from stdin, prints `topic payload` state
/// lines to stdout. A bare `status` line prints every light's status.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = match std::env::args_os().nth(1) {
        Some(path) => SettingsService::open(PathBuf::from(path))?,
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)?;
    info!(
        "Starting BLE light controller (settings {})",
        settings_service.path().display()
    );

    let registry = ModelRegistry::with_overrides(&settings.models)?;
    let transport = Arc::new(BtleTransport::new(&settings.bluetooth).await?);
    let controller = LightController::new(settings.scheduler.clone(), transport, registry);

    for device in &settings.devices {
        controller.register(device.clone());
    }

    let bridge = Bridge::new(&settings.bridge.domain, controller.clone());
    info!("Accepting commands on {}", bridge.command_filter());

    let mut events = controller.subscribe();
    let publisher = {
        let bridge = Bridge::new(&settings.bridge.domain, controller.clone());
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match bridge.render_state(&event) {
                        Ok((topic, body)) => println!("{} {}", topic, body),
                        Err(e) => error!("Failed to render state for {}: {}", event.id, e),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("State publisher lagged, skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&bridge, &controller, line.trim()),
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Read error: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.shutdown().await;
    publisher.abort();
    info!("Exiting");
    Ok(())
}

fn handle_line(bridge: &Bridge, controller: &LightController, line: &str) {
    if line.is_empty() {
        return;
    }
    if line == "status" {
        match serde_json::to_string(&controller.statuses()) {
            Ok(json) => println!("status {}", json),
            Err(e) => error!("Failed to serialize status: {}", e),
        }
        return;
    }

    let Some((topic, payload)) = line.split_once(char::is_whitespace) else {
        warn!("Ignoring line without payload: {}", line);
        return;
    };
    if let Err(e) = bridge.handle(topic, payload.trim()) {
        error!("Command on {} rejected: {}", topic, e);
    }
}
