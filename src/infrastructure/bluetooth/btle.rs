//! btleplug-backed transport.

use crate::domain::error::{ConnectError, SendError};
use crate::domain::models::LightId;
use crate::domain::settings::BluetoothSettings;
use crate::infrastructure::bluetooth::protocol::{self, Frame};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::bluetooth::session::{BleSession, BleTransport, DisconnectNotifier};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct BtleTransport {
    adapter: Adapter,
    scanner: BleScanner,
    scan_timeout: Duration,
    control_char: Uuid,
}

impl BtleTransport {
    /// Use the first adapter the platform reports.
    pub async fn new(settings: &BluetoothSettings) -> anyhow::Result<Self> {
        let control_char = protocol::parse_uuid(&settings.control_char_uuid)?;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ConnectError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            scanner: BleScanner::new(adapter.clone()),
            adapter,
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            control_char,
        })
    }

    async fn open(&self, peripheral: &Peripheral) -> Result<Characteristic, ConnectError> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.control_char)
            .ok_or(ConnectError::CharacteristicNotFound(self.control_char))
    }

    /// Fire `notifier` once when the adapter reports `peripheral` gone.
    async fn watch_disconnect(
        &self,
        peripheral: &Peripheral,
        notifier: DisconnectNotifier,
    ) -> Result<JoinHandle<()>, ConnectError> {
        let mut events = self.adapter.events().await?;
        let target = peripheral.id();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == target {
                        debug!("Peripheral dropped session {}", notifier.session_id());
                        notifier.notify();
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn connect(
        &self,
        address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<Box<dyn BleSession>, ConnectError> {
        let id = LightId::new(address);
        let peripheral = self.scanner.find(&id, self.scan_timeout).await?;

        let characteristic = match self.open(&peripheral).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                if let Err(cleanup) = peripheral.disconnect().await {
                    debug!("Cleanup after failed connect to {}: {}", id, cleanup);
                }
                return Err(e);
            }
        };

        let watcher = self.watch_disconnect(&peripheral, on_disconnect).await?;

        Ok(Box::new(BtleSession {
            peripheral,
            characteristic,
            watcher,
        }))
    }
}

struct BtleSession {
    peripheral: Peripheral,
    characteristic: Characteristic,
    watcher: JoinHandle<()>,
}

#[async_trait]
impl BleSession for BtleSession {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, frame: &Frame) -> Result<(), SendError> {
        self.peripheral
            .write(
                &self.characteristic,
                frame.as_bytes(),
                WriteType::WithoutResponse,
            )
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SendError> {
        self.watcher.abort();
        self.peripheral.disconnect().await.map_err(|e| {
            warn!("Peripheral disconnect failed: {}", e);
            SendError::from(e)
        })
    }
}

impl Drop for BtleSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
