use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Seconds without observed activity before the user counts as idle.
pub const IDLE_THRESHOLD_SECS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Idle,
}

/// Coarse user-activity probe, independent of session state.
pub trait IdleMonitor: Send + Sync {
    fn query_state(&self, threshold_secs: u32) -> Result<ActivityState, InfraError>;
}

/// Treats command traffic as the activity signal: the UI polls the backend
/// while the user is present, so the last command timestamp tracks presence.
#[derive(Debug)]
pub struct HeartbeatIdleMonitor {
    last_activity: Mutex<DateTime<Utc>>,
}

impl HeartbeatIdleMonitor {
    pub fn new() -> Self {
        Self {
            last_activity: Mutex::new(Utc::now()),
        }
    }

    pub fn touch(&self) {
        self.mark_activity_at(Utc::now());
    }

    pub fn mark_activity_at(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = at;
        }
    }
}

impl Default for HeartbeatIdleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleMonitor for HeartbeatIdleMonitor {
    fn query_state(&self, threshold_secs: u32) -> Result<ActivityState, InfraError> {
        let last = self
            .last_activity
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("idle lock poisoned: {error}")))?;
        let idle_for = Utc::now().signed_duration_since(*last);
        if idle_for.num_seconds() >= threshold_secs as i64 {
            Ok(ActivityState::Idle)
        } else {
            Ok(ActivityState::Active)
        }
    }
}

/// Test monitor with an externally pinned state.
#[derive(Debug)]
pub struct ManualIdleMonitor {
    state: Mutex<ActivityState>,
}

impl ManualIdleMonitor {
    pub fn new(state: ActivityState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_state(&self, state: ActivityState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }
}

impl IdleMonitor for ManualIdleMonitor {
    fn query_state(&self, _threshold_secs: u32) -> Result<ActivityState, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("idle lock poisoned: {error}")))?;
        Ok(*state)
    }
}
