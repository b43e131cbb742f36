//! BLE Connection Module
//!
//! Owns the session handle for one light while its processing task runs.

use crate::domain::error::{ConnectError, SendError};
use crate::domain::light::LightState;
use crate::infrastructure::bluetooth::protocol::Frame;
use crate::infrastructure::bluetooth::session::{BleSession, BleTransport, DisconnectNotifier};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Attempts inside a single `connect` call
    pub connect_attempts: u32,
    /// Delay between those attempts
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

struct ActiveSession {
    id: u64,
    session: Box<dyn BleSession>,
}

/// Connection manager for a single light.
pub struct ConnectionManager {
    light: Arc<Mutex<LightState>>,
    transport: Arc<dyn BleTransport>,
    config: ConnectionConfig,
    session: Option<ActiveSession>,
}

impl ConnectionManager {
    pub fn new(
        light: Arc<Mutex<LightState>>,
        transport: Arc<dyn BleTransport>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            light,
            transport,
            config,
            session: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, LightState> {
        lock_light(&self.light)
    }

    /// Whether a session is held and the peripheral has not dropped it.
    pub async fn is_connected(&self) -> bool {
        let Some(active) = &self.session else {
            return false;
        };
        if !self.state().is_session_alive(active.id) {
            return false;
        }
        active.session.is_connected().await
    }

    /// Ensure a live session. Backoff between calls is the caller's job.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.is_connected().await {
            return Ok(());
        }

        if self.session.is_some() {
            debug!("Reconnecting to {}", self.state().debug_name());
            self.disconnect().await;
        }

        let (address, name) = {
            let mut state = self.state();
            state.mark_connecting();
            (state.id().to_string(), state.debug_name())
        };

        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = ConnectError::NotConnected;

        for attempt in 1..=attempts {
            debug!(
                "Establishing connection to {} (attempt {}/{})",
                name, attempt, attempts
            );
            let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
            let notifier = DisconnectNotifier::new(Arc::downgrade(&self.light), session_id);

            match self.transport.connect(&address, notifier).await {
                Ok(session) => {
                    if !session.is_connected().await {
                        warn!("{} dropped the link right after connecting", name);
                        last_error = ConnectError::NotConnected;
                        if let Err(e) = session.disconnect().await {
                            debug!("Cleanup after failed connect to {}: {}", name, e);
                        }
                    } else {
                        self.state().mark_connected(session_id);
                        self.session = Some(ActiveSession {
                            id: session_id,
                            session,
                        });
                        info!("Connected to {}", name);
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, attempts, name, e
                    );
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        let reconnects = {
            let mut state = self.state();
            state.mark_connect_failed();
            state.reconnect_count()
        };
        error!(
            "Failed to establish connection to {} ({} consecutive failures): {}",
            name, reconnects, last_error
        );
        Err(last_error)
    }

    /// Write one frame on the held session. A failed write tears the
    /// session down so the next `connect` starts fresh.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), SendError> {
        if !self.is_connected().await {
            return Err(SendError::NotConnected);
        }
        let Some(active) = &self.session else {
            return Err(SendError::NotConnected);
        };

        let result = active.session.write(frame).await;
        match result {
            Ok(()) => {
                let mut state = self.state();
                state.record_packet(frame.command());
                debug!("Sent data to {}: {}", state.debug_name(), frame.to_hex());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send data to {}: {}", self.state().debug_name(), e);
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Best-effort close. Errors are logged, the handle is always cleared.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.session.take() else {
            self.state().clear_session();
            return;
        };

        let name = self.state().debug_name();
        if active.session.is_connected().await {
            debug!("Disconnecting from {}", name);
            if let Err(e) = active.session.disconnect().await {
                error!("Failed to disconnect from {}: {}", name, e);
            }
        }
        self.state().clear_session();
    }
}

/// Lock a light, recovering the data if a panicking task poisoned it.
pub(crate) fn lock_light(light: &Mutex<LightState>) -> MutexGuard<'_, LightState> {
    light.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionStatus, LightId};
    use crate::domain::registry::ModelDescriptor;
    use crate::infrastructure::bluetooth::fake::FakeTransport;
    use crate::infrastructure::bluetooth::protocol::power_frame;

    fn manager(transport: Arc<FakeTransport>) -> (Arc<Mutex<LightState>>, ConnectionManager) {
        let light = Arc::new(Mutex::new(LightState::new(
            LightId::new("A4:C1:38:00:00:01"),
            "Desk".to_string(),
            "default".to_string(),
            ModelDescriptor::default(),
        )));
        let config = ConnectionConfig {
            connect_attempts: 2,
            retry_delay: Duration::from_millis(10),
        };
        let manager = ConnectionManager::new(light.clone(), transport, config);
        (light, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_cheap_when_already_connected() {
        let transport = Arc::new(FakeTransport::new());
        let (light, mut manager) = manager(transport.clone());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(
            light.lock().unwrap().connection_status(),
            ConnectionStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_counts_once_per_call() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_connects(u32::MAX);
        let (light, mut manager) = manager(transport.clone());

        assert!(manager.connect().await.is_err());
        assert!(manager.connect().await.is_err());

        let state = light.lock().unwrap();
        assert_eq!(state.reconnect_count(), 2);
        assert_eq!(state.connection_status(), ConnectionStatus::Failed);
        assert_eq!(transport.connect_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_reconnect_count() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_connects(2);
        let (light, mut manager) = manager(transport.clone());

        assert!(manager.connect().await.is_err());
        assert_eq!(light.lock().unwrap().reconnect_count(), 1);

        manager.connect().await.unwrap();
        assert_eq!(light.lock().unwrap().reconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peripheral_disconnect_forces_reconnect() {
        let transport = Arc::new(FakeTransport::new());
        let (light, mut manager) = manager(transport.clone());

        manager.connect().await.unwrap();
        transport.drop_link(&LightId::new("A4:C1:38:00:00:01"));
        assert_eq!(
            light.lock().unwrap().connection_status(),
            ConnectionStatus::Disconnected
        );

        manager.connect().await.unwrap();
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_clears_session() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_writes(1);
        let (light, mut manager) = manager(transport.clone());

        manager.connect().await.unwrap();
        let frame = power_frame(true).unwrap();
        assert!(manager.send(&frame).await.is_err());
        assert!(!manager.is_connected().await);
        assert!(matches!(
            manager.send(&frame).await,
            Err(SendError::NotConnected)
        ));

        manager.connect().await.unwrap();
        manager.send(&frame).await.unwrap();
        assert_eq!(transport.frames().len(), 1);
        assert_eq!(light.lock().unwrap().status().last_command, Some(0x01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let transport = Arc::new(FakeTransport::new());
        let (light, mut manager) = manager(transport.clone());

        manager.disconnect().await;
        manager.connect().await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(
            light.lock().unwrap().connection_status(),
            ConnectionStatus::Disconnected
        );
    }
}
