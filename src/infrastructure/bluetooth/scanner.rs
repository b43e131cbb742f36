//! BLE Scanner Module
//!
//! Resolves a configured light address to a btleplug peripheral.

use crate::domain::error::ConnectError;
use crate::domain::models::LightId;
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Looks up peripherals by address on one adapter.
#[derive(Clone)]
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Peripherals the adapter already knows about are returned without
    /// scanning. Otherwise scan until the address shows up or `timeout`
    /// elapses.
    pub async fn find(&self, id: &LightId, timeout: Duration) -> Result<Peripheral, ConnectError> {
        if let Some(peripheral) = self.known(id).await? {
            return Ok(peripheral);
        }

        info!("Scanning for {}...", id);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + timeout;
        let found = loop {
            if let Some(peripheral) = self.known(id).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            time::sleep(POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| ConnectError::NotFound(id.to_string()))
    }

    async fn known(&self, id: &LightId) -> Result<Option<Peripheral>, ConnectError> {
        let peripherals = self.adapter.peripherals().await?;
        debug!("Adapter knows {} peripherals", peripherals.len());
        Ok(peripherals
            .into_iter()
            .find(|p| matches_address(id, &p.address().to_string(), &p.id().to_string())))
    }
}

/// Match on the hardware address, or on the platform id where the
/// platform hides addresses.
fn matches_address(id: &LightId, address: &str, platform_id: &str) -> bool {
    LightId::new(address) == *id || platform_id.eq_ignore_ascii_case(id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_address_ignores_case_and_separators() {
        let id = LightId::new("a4c1380d1e2f");
        assert!(matches_address(&id, "A4:C1:38:0D:1E:2F", "hci0/dev_x"));
        assert!(!matches_address(&id, "A4:C1:38:0D:1E:30", "hci0/dev_x"));
    }

    #[test]
    fn test_matches_platform_id() {
        let id = LightId::new("5f3c0b6e-1111-2222-3333-444455556666");
        assert!(matches_address(
            &id,
            "00:00:00:00:00:00",
            "5F3C0B6E-1111-2222-3333-444455556666"
        ));
    }
}
