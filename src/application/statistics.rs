use crate::domain::stats::{self, DayStats, StatsHistory, RETENTION_DAYS};
use crate::infrastructure::logging::EventLog;
use crate::infrastructure::storage::KeyValueStore;
use chrono::NaiveDate;
use std::sync::Arc;

pub const STATS_KEY: &str = "stats";

/// Per-day counters behind the KV store. Every successful write prunes the
/// retention horizon; a failed write is logged and the in-memory history
/// stays authoritative for this process.
pub struct StatsAggregator<K: KeyValueStore> {
    store: Arc<K>,
    log: Arc<EventLog>,
    history: StatsHistory,
}

impl<K: KeyValueStore> StatsAggregator<K> {
    pub fn new(store: Arc<K>, log: Arc<EventLog>) -> Self {
        let history = match store.get(STATS_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            Ok(None) => StatsHistory::new(),
            Err(error) => {
                log.error("stats.load", &error.to_string());
                StatsHistory::new()
            }
        };
        Self {
            store,
            log,
            history,
        }
    }

    pub fn history(&self) -> &StatsHistory {
        &self.history
    }

    pub fn day(&self, day: NaiveDate) -> DayStats {
        self.history
            .get(&stats::day_key(day))
            .copied()
            .unwrap_or_default()
    }

    pub fn record_completion(&mut self, day: NaiveDate) {
        stats::increment_completed(&mut self.history, day);
        self.finish_write(day);
    }

    pub fn record_focus_minutes(&mut self, day: NaiveDate, minutes: u32) {
        stats::add_focus_minutes(&mut self.history, day, minutes);
        self.finish_write(day);
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.persist();
    }

    fn finish_write(&mut self, today: NaiveDate) {
        stats::prune(&mut self.history, RETENTION_DAYS, today);
        self.persist();
    }

    fn persist(&self) {
        let value = match serde_json::to_value(&self.history) {
            Ok(value) => value,
            Err(error) => {
                self.log.error("stats.persist", &error.to_string());
                return;
            }
        };
        if let Err(error) = self.store.set(STATS_KEY, &value) {
            self.log.error("stats.persist", &error.to_string());
        }
    }
}
