//! Transport seam between the connection manager and a BLE stack.

use crate::domain::error::{ConnectError, SendError};
use crate::domain::light::LightState;
use crate::infrastructure::bluetooth::protocol::Frame;
use async_trait::async_trait;
use std::sync::{Mutex, Weak};
use tracing::debug;

/// Opens sessions to peripherals by address.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Establish a session. `on_disconnect` must be fired by the transport
    /// when the peripheral drops the link on its own.
    async fn connect(
        &self,
        address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<Box<dyn BleSession>, ConnectError>;
}

/// An open link to one peripheral's control characteristic.
#[async_trait]
pub trait BleSession: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Write without response.
    async fn write(&self, frame: &Frame) -> Result<(), SendError>;

    async fn disconnect(&self) -> Result<(), SendError>;
}

/// Delivers a peripheral-initiated disconnect to the light's status.
///
/// Tagged with the session it was issued for, so a late notification from
/// a replaced session does not clobber the current one.
#[derive(Debug, Clone)]
pub struct DisconnectNotifier {
    light: Weak<Mutex<LightState>>,
    session_id: u64,
}

impl DisconnectNotifier {
    pub fn new(light: Weak<Mutex<LightState>>, session_id: u64) -> Self {
        Self { light, session_id }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn notify(&self) {
        let Some(light) = self.light.upgrade() else {
            return;
        };
        let Ok(mut state) = light.lock() else {
            return;
        };
        if state.mark_disconnected(self.session_id) {
            debug!("Disconnected from {}", state.debug_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionStatus, LightId};
    use crate::domain::registry::ModelDescriptor;
    use std::sync::Arc;

    #[test]
    fn test_notifier_ignores_replaced_session() {
        let light = Arc::new(Mutex::new(LightState::new(
            LightId::new("A4:C1:38:00:00:01"),
            "Desk".to_string(),
            "default".to_string(),
            ModelDescriptor::default(),
        )));
        light.lock().unwrap().mark_connected(2);

        DisconnectNotifier::new(Arc::downgrade(&light), 1).notify();
        assert_eq!(
            light.lock().unwrap().connection_status(),
            ConnectionStatus::Connected
        );

        DisconnectNotifier::new(Arc::downgrade(&light), 2).notify();
        assert_eq!(
            light.lock().unwrap().connection_status(),
            ConnectionStatus::Disconnected
        );
    }
}
