use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JiraSettings {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub auto_sync: bool,
    pub sync_interval_minutes: u32,
}

impl Default for JiraSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            email: String::new(),
            api_token: String::new(),
            auto_sync: false,
            sync_interval_minutes: 30,
        }
    }
}

impl JiraSettings {
    /// All three credentials the fetch path needs: base URL, email, API token.
    pub fn has_credentials(&self) -> bool {
        !self.base_url.trim().is_empty()
            && !self.email.trim().is_empty()
            && !self.api_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimerSettings {
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub long_break_interval: u32,
    pub auto_start: bool,
    pub pause_on_idle: bool,
    pub notifications_enabled: bool,
    pub notification_volume: u8,
    pub jira: JiraSettings,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_duration: 25,
            short_break_duration: 5,
            long_break_duration: 15,
            long_break_interval: 4,
            auto_start: false,
            pause_on_idle: false,
            notifications_enabled: true,
            notification_volume: 80,
            jira: JiraSettings::default(),
        }
    }
}

impl TimerSettings {
    pub fn normalized(mut self) -> Self {
        self.work_duration = self.work_duration.max(1);
        self.short_break_duration = self.short_break_duration.max(1);
        self.long_break_duration = self.long_break_duration.max(1);
        self.long_break_interval = self.long_break_interval.max(1);
        self.notification_volume = self.notification_volume.min(100);
        self
    }

    pub fn work_secs(&self) -> u32 {
        self.work_duration * 60
    }

    pub fn short_break_secs(&self) -> u32 {
        self.short_break_duration * 60
    }

    pub fn long_break_secs(&self) -> u32 {
        self.long_break_duration * 60
    }

    /// A long break follows the work session that brings the cycle to a
    /// multiple of the interval.
    pub fn is_long_break_session(&self, current_session: u32) -> bool {
        current_session % self.long_break_interval.max(1) == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionState {
    pub is_running: bool,
    pub time_left: u32,
    pub end_time: Option<DateTime<Utc>>,
    pub current_session: u32,
    pub is_work_session: bool,
    pub was_paused_for_idle: bool,
    pub session_total_secs: u32,
    pub settings: TimerSettings,
    pub current_task_id: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        let settings = TimerSettings::default();
        let work_secs = settings.work_secs();
        Self {
            is_running: false,
            time_left: work_secs,
            end_time: None,
            current_session: 1,
            is_work_session: true,
            was_paused_for_idle: false,
            session_total_secs: work_secs,
            settings,
            current_task_id: None,
        }
    }
}

impl SessionState {
    pub fn validate(&self) -> Result<(), String> {
        if self.current_session == 0 {
            return Err("session.current_session must be >= 1".to_string());
        }
        if self.is_running != self.end_time.is_some() {
            return Err("session.end_time must be set exactly while running".to_string());
        }
        if self.settings.work_duration == 0
            || self.settings.short_break_duration == 0
            || self.settings.long_break_duration == 0
        {
            return Err("session.settings durations must be >= 1 minute".to_string());
        }
        if self.settings.long_break_interval == 0 {
            return Err("session.settings.long_break_interval must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Remaining whole seconds until `end_time`, never negative. Rounds up so a
/// countdown only reaches zero once the deadline has actually passed.
pub fn remaining_seconds(end_time: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let millis = (end_time - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        millis.div_ceil(1000) as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub estimated_pomodoros: u32,
    pub completed_pomodoros: u32,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task.id must not be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("task.title must not be empty".to_string());
        }
        if self.estimated_pomodoros == 0 {
            return Err("task.estimated_pomodoros must be >= 1".to_string());
        }
        if self.is_completed != self.completed_at.is_some() {
            return Err("task.completed_at must be set exactly when completed".to_string());
        }
        Ok(())
    }
}
