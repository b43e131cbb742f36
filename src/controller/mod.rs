//! Update Scheduler
//!
//! Public Update API for a set of lights sharing a bounded number of BLE
//! sessions.
//!
//! ## Per-light lifecycle
//!
//! ```text
//!   Idle ──request_update──▶ Active ──task ends──▶ Idle
//!     │                        ▲
//!     └──(no free slot)──▶ Queued ──(slot released)──┘
//! ```
//!
//! Setters only touch desired state. `request_update` admits the light and,
//! when a slot is free, spawns its processing task. A finishing task hands
//! its slot to the oldest queued light; that is the only way the queue
//! advances. A light written to while its session was closing is admitted
//! again behind whoever was already waiting.

pub mod scheduler;
pub mod worker;

use crate::domain::error::ControllerError;
use crate::domain::light::LightState;
use crate::domain::models::{AttrValue, LightConfig, LightId, LightStatus, Rgb, StateEvent};
use crate::domain::registry::ModelRegistry;
use crate::domain::settings::SchedulerSettings;
use crate::infrastructure::bluetooth::connection::{lock_light, ConnectionConfig, ConnectionManager};
use crate::infrastructure::bluetooth::session::BleTransport;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use scheduler::{Admission, SchedulerSnapshot, SchedulerState};
pub use worker::Outcome;

const EVENT_CAPACITY: usize = 256;

struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct Scheduler {
    state: SchedulerState,
    tasks: HashMap<LightId, TaskHandle>,
}

struct Inner {
    settings: SchedulerSettings,
    transport: Arc<dyn BleTransport>,
    registry: ModelRegistry,
    runtime: Handle,
    events: broadcast::Sender<StateEvent>,
    // Lock order: scheduler before lights.
    scheduler: Mutex<Scheduler>,
    lights: Mutex<HashMap<LightId, Arc<Mutex<LightState>>>>,
}

#[derive(Clone)]
pub struct LightController {
    inner: Arc<Inner>,
}

impl LightController {
    /// Must be called from within a Tokio runtime; processing tasks are
    /// spawned onto it.
    pub fn new(
        settings: SchedulerSettings,
        transport: Arc<dyn BleTransport>,
        registry: ModelRegistry,
    ) -> Self {
        Self::with_runtime(settings, transport, registry, Handle::current())
    }

    pub fn with_runtime(
        settings: SchedulerSettings,
        transport: Arc<dyn BleTransport>,
        registry: ModelRegistry,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let scheduler = Scheduler {
            state: SchedulerState::new(settings.max_parallel),
            tasks: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                transport,
                registry,
                runtime,
                events,
                scheduler: Mutex::new(scheduler),
                lights: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a light. Registering a known address again is a no-op and
    /// keeps the existing state.
    pub fn register(&self, config: LightConfig) -> LightId {
        let id = LightId::new(&config.address);
        {
            let mut lights = self.inner.lights();
            lights.entry(id.clone()).or_insert_with(|| {
                let descriptor = self.inner.registry.lookup(&config.model);
                if !self.inner.registry.is_known(&config.model) {
                    warn!(
                        "Unknown model {:?} for {}, using default descriptor",
                        config.model, id
                    );
                }
                let name = config.name.clone().unwrap_or_else(|| id.to_string());
                info!("Registered {} ({}) as model {}", name, id, config.model);
                Arc::new(Mutex::new(LightState::new(
                    id.clone(),
                    name,
                    config.model.clone(),
                    descriptor,
                )))
            });
        }
        self.inner.scheduler().state.register(id.clone());
        id
    }

    pub fn is_registered(&self, id: &LightId) -> bool {
        self.inner.lights().contains_key(id)
    }

    pub fn set_desired_power(&self, id: &LightId, on: bool) -> Result<(), ControllerError> {
        self.set_desired(id, AttrValue::Power(on))
    }

    /// `brightness` is normalized 0..=255 and scaled to the model's device
    /// units, rounding up. State events report the requested value back.
    pub fn set_desired_brightness(&self, id: &LightId, brightness: u8) -> Result<(), ControllerError> {
        let light = self.inner.light(id)?;
        lock_light(&light).set_desired_brightness(brightness);
        Ok(())
    }

    pub fn set_desired_rgb(&self, id: &LightId, rgb: Rgb) -> Result<(), ControllerError> {
        self.set_desired(id, AttrValue::Rgb(rgb))
    }

    /// Sent as an RGB approximation; clamped to the supported range.
    pub fn set_desired_color_temp_kelvin(&self, id: &LightId, kelvin: u32) -> Result<(), ControllerError> {
        let light = self.inner.light(id)?;
        lock_light(&light).set_desired_color_temp(kelvin);
        Ok(())
    }

    fn set_desired(&self, id: &LightId, value: AttrValue) -> Result<(), ControllerError> {
        let light = self.inner.light(id)?;
        lock_light(&light).set_desired(value)?;
        Ok(())
    }

    /// Schedule the light for processing. Never blocks on I/O.
    pub fn request_update(&self, id: &LightId) -> Result<Admission, ControllerError> {
        let mut scheduler = self.inner.scheduler();
        let admission = scheduler.state.admit(id)?;
        match admission {
            Admission::Activate => self.inner.spawn_task(&mut scheduler, id.clone()),
            Admission::Queued => debug!("{} queued, all session slots busy", id),
            Admission::Coalesced => debug!("{} already scheduled", id),
        }
        Ok(admission)
    }

    pub fn status(&self, id: &LightId) -> Option<LightStatus> {
        let light = self.inner.light(id).ok()?;
        let status = lock_light(&light).status();
        Some(status)
    }

    /// Every light, ordered by id.
    pub fn statuses(&self) -> Vec<LightStatus> {
        let lights: Vec<Arc<Mutex<LightState>>> = self.inner.lights().values().cloned().collect();
        let mut statuses: Vec<LightStatus> = lights
            .iter()
            .map(|light| lock_light(light).status())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// State events, one per successfully sent attribute.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.events.subscribe()
    }

    pub fn scheduler_snapshot(&self) -> SchedulerSnapshot {
        self.inner.scheduler().state.snapshot()
    }

    /// Neither queued nor active.
    pub fn is_idle(&self, id: &LightId) -> bool {
        let scheduler = self.inner.scheduler();
        !scheduler.state.is_active(id) && !scheduler.state.is_queued(id)
    }

    /// Cancel the light's task (which disconnects) and forget it.
    pub async fn remove_light(&self, id: &LightId) -> bool {
        let task = {
            let mut scheduler = self.inner.scheduler();
            if !scheduler.state.remove(id) {
                return false;
            }
            scheduler.tasks.remove(id)
        };

        if let Some(task) = task {
            let _ = task.cancel.send(true);
            if let Err(e) = task.join.await {
                error!("Task for {} failed while being removed: {}", id, e);
            }
        }

        self.inner.lights().remove(id);
        info!("Removed {}", id);
        true
    }

    /// Refuse new requests, drop the queue, cancel every active task and
    /// wait for them to disconnect.
    pub async fn shutdown(&self) {
        let tasks: Vec<(LightId, TaskHandle)> = {
            let mut scheduler = self.inner.scheduler();
            let active = scheduler.state.drain_for_shutdown();
            info!("Shutting down, cancelling {} active lights", active.len());
            scheduler.tasks.drain().collect()
        };

        for (_, task) in &tasks {
            let _ = task.cancel.send(true);
        }
        for (id, task) in tasks {
            if let Err(e) = task.join.await {
                error!("Task for {} failed during shutdown: {}", id, e);
            }
        }
        info!("Shutdown complete");
    }
}

impl Inner {
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lights(&self) -> MutexGuard<'_, HashMap<LightId, Arc<Mutex<LightState>>>> {
        self.lights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn light(&self, id: &LightId) -> Result<Arc<Mutex<LightState>>, ControllerError> {
        self.lights()
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownLight(id.clone()))
    }

    /// Spawn the processing task for a light that was just made active.
    /// Called with the scheduler lock held.
    fn spawn_task(self: &Arc<Self>, scheduler: &mut Scheduler, id: LightId) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Ok(light) = self.light(&id) else {
                error!("Active light {} has no state, releasing its slot", id);
                next = scheduler.state.complete(&id);
                continue;
            };

            let (cancel, cancel_rx) = watch::channel(false);
            let inner = Arc::clone(self);
            let task_id = id.clone();
            let join = self.runtime.spawn(async move {
                let outcome = inner.run_task(&task_id, light.clone(), cancel_rx).await;
                inner.finish(&task_id, &light, outcome);
            });
            scheduler.tasks.insert(id, TaskHandle { cancel, join });
        }
    }

    /// `None` when the worker panicked.
    async fn run_task(
        self: &Arc<Self>,
        id: &LightId,
        light: Arc<Mutex<LightState>>,
        cancel: watch::Receiver<bool>,
    ) -> Option<Outcome> {
        let name = lock_light(&light).debug_name();
        debug!("Processing {}", name);

        let config = ConnectionConfig {
            connect_attempts: self.settings.connect_attempts,
            retry_delay: self.settings.connect_retry_delay(),
        };
        let mut connection = ConnectionManager::new(light.clone(), self.transport.clone(), config);

        let weak = Arc::downgrade(self);
        let starved: worker::StarvedCheck = Arc::new(move || {
            weak.upgrade()
                .map(|inner| inner.scheduler().state.is_starved())
                .unwrap_or(false)
        });
        let worker = worker::Worker::new(light, self.settings.clone(), self.events.clone(), starved);

        let outcome = AssertUnwindSafe(worker.run(&mut connection, cancel))
            .catch_unwind()
            .await;
        connection.disconnect().await;

        match outcome {
            Ok(outcome) => {
                worker::log_outcome(&name, outcome);
                Some(outcome)
            }
            Err(_) => {
                error!("Processing task for {} ({}) panicked", name, id);
                None
            }
        }
    }

    /// Release the slot and start whoever was waiting, under one lock.
    ///
    /// The worker only ends clean on `Expired` or `Yielded`, so a dirty light
    /// after either was written to during the disconnect. Its request was
    /// coalesced into this task, so it is admitted again here. Admission
    /// fails once the light is removed or the controller is shutting down.
    fn finish(self: &Arc<Self>, id: &LightId, light: &Arc<Mutex<LightState>>, outcome: Option<Outcome>) {
        let mut scheduler = self.scheduler();
        scheduler.tasks.remove(id);
        if let Some(next) = scheduler.state.complete(id) {
            debug!("Handing slot from {} to {}", id, next);
            self.spawn_task(&mut scheduler, next);
        }

        let ended_clean = matches!(outcome, Some(Outcome::Expired | Outcome::Yielded));
        if !ended_clean || !lock_light(light).is_dirty() {
            return;
        }
        match scheduler.state.admit(id) {
            Ok(Admission::Activate) => {
                debug!("{} changed while disconnecting, processing again", id);
                self.spawn_task(&mut scheduler, id.clone());
            }
            Ok(_) => debug!("{} changed while disconnecting, queued again", id),
            Err(e) => debug!("Not readmitting {}: {}", id, e),
        }
    }
}
