//! Admission control.
//!
//! Pure bookkeeping for which lights are waiting and which hold one of the
//! `max_parallel` session slots. The controller wraps it in a mutex and only
//! ever touches it for membership changes.

use crate::domain::error::ControllerError;
use crate::domain::models::LightId;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// What an update request resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already queued or active; the running task picks up the new state.
    Coalesced,
    /// Took a free slot; the caller spawns the processing task.
    Activate,
    /// All slots busy; waiting in FIFO order.
    Queued,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub registered: usize,
    pub queued: Vec<LightId>,
    pub active: Vec<LightId>,
    pub shutting_down: bool,
}

#[derive(Debug)]
pub struct SchedulerState {
    max_parallel: usize,
    registered: HashSet<LightId>,
    queued: VecDeque<LightId>,
    active: HashSet<LightId>,
    shutting_down: bool,
}

impl SchedulerState {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            registered: HashSet::new(),
            queued: VecDeque::new(),
            active: HashSet::new(),
            shutting_down: false,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Returns `false` if the light was already registered.
    pub fn register(&mut self, id: LightId) -> bool {
        self.registered.insert(id)
    }

    pub fn is_registered(&self, id: &LightId) -> bool {
        self.registered.contains(id)
    }

    pub fn is_active(&self, id: &LightId) -> bool {
        self.active.contains(id)
    }

    pub fn is_queued(&self, id: &LightId) -> bool {
        self.queued.contains(id)
    }

    pub fn admit(&mut self, id: &LightId) -> Result<Admission, ControllerError> {
        if self.shutting_down {
            return Err(ControllerError::ShuttingDown);
        }
        if !self.registered.contains(id) {
            return Err(ControllerError::UnknownLight(id.clone()));
        }
        if self.active.contains(id) || self.queued.contains(id) {
            return Ok(Admission::Coalesced);
        }
        if self.active.len() < self.max_parallel {
            self.active.insert(id.clone());
            Ok(Admission::Activate)
        } else {
            self.queued.push_back(id.clone());
            Ok(Admission::Queued)
        }
    }

    /// Release `id`'s slot and hand it to the oldest waiting light, which
    /// becomes active and must be spawned by the caller.
    pub fn complete(&mut self, id: &LightId) -> Option<LightId> {
        self.active.remove(id);
        if self.shutting_down || self.active.len() >= self.max_parallel {
            return None;
        }
        let next = self.queued.pop_front()?;
        self.active.insert(next.clone());
        Some(next)
    }

    /// Someone is waiting and every slot is taken.
    pub fn is_starved(&self) -> bool {
        !self.queued.is_empty() && self.active.len() >= self.max_parallel
    }

    /// Forget `id`. An active light keeps its slot until its task completes.
    pub fn remove(&mut self, id: &LightId) -> bool {
        self.queued.retain(|queued| queued != id);
        self.registered.remove(id)
    }

    /// Refuse further admissions and drop the queue. Returns the lights
    /// whose tasks still need cancelling.
    pub fn drain_for_shutdown(&mut self) -> Vec<LightId> {
        self.shutting_down = true;
        self.queued.clear();
        self.active.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut active: Vec<LightId> = self.active.iter().cloned().collect();
        active.sort();
        SchedulerSnapshot {
            registered: self.registered.len(),
            queued: self.queued.iter().cloned().collect(),
            active,
            shutting_down: self.shutting_down,
        }
    }
}
