//! In-memory transport for tests. Records every frame written and can
//! inject connect/write failures and peripheral-initiated disconnects.

use crate::domain::error::{ConnectError, SendError};
use crate::domain::models::LightId;
use crate::infrastructure::bluetooth::protocol::Frame;
use crate::infrastructure::bluetooth::session::{BleSession, BleTransport, DisconnectNotifier};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    connect_failures: AtomicU32,
    write_failures: AtomicU32,
    open_sessions: AtomicUsize,
    max_open_sessions: AtomicUsize,
    disconnect_delay: Mutex<Duration>,
    unreachable: Mutex<HashSet<LightId>>,
    frames: Mutex<Vec<(LightId, Frame)>>,
    links: Mutex<HashMap<LightId, (Arc<AtomicBool>, DisconnectNotifier)>>,
}

impl FakeState {
    fn close(&self, connected: &AtomicBool) {
        if connected.swap(false, Ordering::SeqCst) {
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connects, for every address.
    pub fn fail_connects(&self, count: u32) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` writes.
    pub fn fail_writes(&self, count: u32) {
        self.state.write_failures.store(count, Ordering::SeqCst);
    }

    /// Every connect to `id` fails.
    pub fn set_unreachable(&self, id: &LightId) {
        self.state.unreachable.lock().unwrap().insert(id.clone());
    }

    /// Every local disconnect takes `delay` before the link closes.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        *self.state.disconnect_delay.lock().unwrap() = delay;
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self, id: &LightId) {
        let link = self.state.links.lock().unwrap().remove(id);
        if let Some((connected, notifier)) = link {
            self.state.close(&connected);
            notifier.notify();
        }
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state.max_open_sessions.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<(LightId, Frame)> {
        self.state.frames.lock().unwrap().clone()
    }

    pub fn frames_for(&self, id: &LightId) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|(light, _)| light == id)
            .map(|(_, frame)| frame)
            .collect()
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn connect(
        &self,
        address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<Box<dyn BleSession>, ConnectError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let id = LightId::new(address);
        if self.state.unreachable.lock().unwrap().contains(&id) {
            return Err(ConnectError::NotFound(address.to_string()));
        }
        if take_one(&self.state.connect_failures) {
            return Err(ConnectError::Ble("injected connect failure".to_string()));
        }

        let connected = Arc::new(AtomicBool::new(true));
        let open = self.state.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open_sessions.fetch_max(open, Ordering::SeqCst);
        self.state
            .links
            .lock()
            .unwrap()
            .insert(id.clone(), (connected.clone(), on_disconnect));

        Ok(Box::new(FakeSession {
            id,
            connected,
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    id: LightId,
    connected: Arc<AtomicBool>,
    state: Arc<FakeState>,
}

#[async_trait]
impl BleSession for FakeSession {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, frame: &Frame) -> Result<(), SendError> {
        tokio::task::yield_now().await;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SendError::NotConnected);
        }
        if take_one(&self.state.write_failures) {
            return Err(SendError::Ble("injected write failure".to_string()));
        }
        self.state
            .frames
            .lock()
            .unwrap()
            .push((self.id.clone(), *frame));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SendError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.disconnect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.close(&self.connected);
        Ok(())
    }
}
