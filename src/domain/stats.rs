use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RETENTION_DAYS: i64 = 30;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Daily counters keyed by `YYYY-MM-DD` in the process-local calendar.
pub type StatsHistory = BTreeMap<String, DayStats>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DayStats {
    pub completed: u32,
    pub focus_minutes: u32,
}

pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMAT).to_string()
}

pub fn increment_completed(history: &mut StatsHistory, day: NaiveDate) {
    let entry = history.entry(day_key(day)).or_default();
    entry.completed = entry.completed.saturating_add(1);
}

pub fn add_focus_minutes(history: &mut StatsHistory, day: NaiveDate, minutes: u32) {
    let entry = history.entry(day_key(day)).or_default();
    entry.focus_minutes = entry.focus_minutes.saturating_add(minutes);
}

/// Drops entries whose key parses to a date older than the retention horizon.
/// Keys that do not parse are left alone.
pub fn prune(history: &mut StatsHistory, retention_days: i64, today: NaiveDate) -> usize {
    let horizon = today - chrono::Duration::days(retention_days);
    let before = history.len();
    history.retain(|key, _| match NaiveDate::parse_from_str(key, DAY_KEY_FORMAT) {
        Ok(date) => date >= horizon,
        Err(_) => true,
    });
    before - history.len()
}
