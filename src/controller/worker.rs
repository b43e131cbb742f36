//! Per-light processing task.
//!
//! Connects, drains dirty attributes in priority order, then keeps the
//! session warm until it times out or the slot is wanted elsewhere.

use crate::domain::models::{AttrValue, StateEvent};
use crate::domain::light::LightState;
use crate::domain::settings::SchedulerSettings;
use crate::infrastructure::bluetooth::connection::{lock_light, ConnectionManager};
use crate::infrastructure::bluetooth::protocol;
use rand::Rng;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

/// Asks the scheduler whether another light is waiting for a slot.
pub type StarvedCheck = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct Worker {
    light: Arc<Mutex<LightState>>,
    settings: SchedulerSettings,
    events: broadcast::Sender<StateEvent>,
    starved: StarvedCheck,
}

/// Why a processing task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep-alive ran its full duration.
    Expired,
    /// Clean and another light needed the slot.
    Yielded,
    /// `max_attempts` consecutive failures.
    GaveUp,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Expired => "keep-alive expired",
            Outcome::Yielded => "yielded slot",
            Outcome::GaveUp => "gave up",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

enum KeepAlive {
    Dirty,
    Expired,
    Yielded,
    Failed,
}

impl Worker {
    pub fn new(
        light: Arc<Mutex<LightState>>,
        settings: SchedulerSettings,
        events: broadcast::Sender<StateEvent>,
        starved: StarvedCheck,
    ) -> Self {
        Self {
            light,
            settings,
            events,
            starved,
        }
    }

    /// Process until done or cancelled. The caller owns `connection` and
    /// disconnects it afterwards, whatever the outcome.
    pub async fn run(
        &self,
        connection: &mut ConnectionManager,
        mut cancel: watch::Receiver<bool>,
    ) -> Outcome {
        tokio::select! {
            outcome = self.process(connection) => outcome,
            _ = cancelled(&mut cancel) => Outcome::Cancelled,
        }
    }

    async fn process(&self, connection: &mut ConnectionManager) -> Outcome {
        let name = self.state().debug_name();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            self.state().set_send_attempts(attempts);
            if attempts >= max_attempts {
                error!(
                    "Giving up on {} after {} failed attempts",
                    name, attempts
                );
                return Outcome::GaveUp;
            }

            if let Err(e) = connection.connect().await {
                attempts += 1;
                warn!("Connect to {} failed ({}/{}): {}", name, attempts, max_attempts, e);
                self.backoff(attempts, max_attempts).await;
                continue;
            }

            let pending = {
                let state = self.state();
                state.next_pending().map(|value| (value, *state.descriptor()))
            };

            let Some((value, descriptor)) = pending else {
                match self.keep_alive(connection).await {
                    KeepAlive::Dirty => continue,
                    KeepAlive::Expired => return Outcome::Expired,
                    KeepAlive::Yielded => return Outcome::Yielded,
                    KeepAlive::Failed => {
                        attempts += 1;
                        self.backoff(attempts, max_attempts).await;
                        continue;
                    }
                }
            };

            let sent = match protocol::attr_frame(&descriptor, value) {
                Ok(frame) => connection.send(&frame).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match sent {
                Ok(()) => {
                    self.confirm(value);
                    attempts = 0;
                }
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "Sending {:?} to {} failed ({}/{}): {}",
                        value.attr(),
                        name,
                        attempts,
                        max_attempts,
                        e
                    );
                    self.backoff(attempts, max_attempts).await;
                }
            }
        }
    }

    fn confirm(&self, value: AttrValue) {
        let event = {
            let mut state = self.state();
            state.commit_sent(value);
            StateEvent {
                id: state.id().clone(),
                model: state.model().to_string(),
                attr: value.attr(),
                confirmed: *state.confirmed(),
                brightness_max: state.descriptor().brightness_max,
            }
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Resend confirmed attributes round-robin so the peripheral keeps the
    /// link open.
    async fn keep_alive(&self, connection: &mut ConnectionManager) -> KeepAlive {
        let deadline = Instant::now() + self.settings.keep_alive_max_duration();
        let interval = self.settings.keep_alive_interval();
        let mut roll = 0u32;

        loop {
            if let Some(stop) = self.keep_alive_stop(deadline) {
                return stop;
            }
            time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
            if let Some(stop) = self.keep_alive_stop(deadline) {
                return stop;
            }

            let (value, descriptor) = {
                let state = self.state();
                (state.keep_alive_value(roll), *state.descriptor())
            };
            roll = roll.wrapping_add(1);

            let frame = match protocol::attr_frame(&descriptor, value) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Cannot encode keep-alive {:?}: {}", value, e);
                    return KeepAlive::Failed;
                }
            };
            if let Err(e) = connection.send(&frame).await {
                warn!("Keep-alive failed: {}", e);
                return KeepAlive::Failed;
            }
        }
    }

    fn keep_alive_stop(&self, deadline: Instant) -> Option<KeepAlive> {
        if self.state().is_dirty() {
            Some(KeepAlive::Dirty)
        } else if (self.starved)() {
            Some(KeepAlive::Yielded)
        } else if Instant::now() >= deadline {
            Some(KeepAlive::Expired)
        } else {
            None
        }
    }

    async fn backoff(&self, attempts: u32, max_attempts: u32) {
        if attempts >= max_attempts {
            return;
        }
        let delay = backoff_delay(&self.settings);
        debug!("Retrying in {:?}", delay);
        time::sleep(delay).await;
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LightState> {
        lock_light(&self.light)
    }
}

/// Uniform jitter in `[backoff_min, backoff_max]`.
fn backoff_delay(settings: &SchedulerSettings) -> Duration {
    let (min, max) = settings.backoff_range();
    if min == max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Log how a task ended.
pub fn log_outcome(name: &str, outcome: Outcome) {
    match outcome {
        Outcome::GaveUp => warn!("Processing {} ended: {}", name, outcome),
        _ => info!("Processing {} ended: {}", name, outcome),
    }
}
