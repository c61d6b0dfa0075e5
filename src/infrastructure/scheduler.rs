use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::EventLog;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

const PUMP_IDLE_WAIT: Duration = Duration::from_secs(60);
const PUMP_MIN_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmSchedule {
    Once { at: DateTime<Utc> },
    Every { minutes: u32 },
}

/// Named wake-ups that outlive the process. Each name is an independent
/// identity; re-creating a name replaces its previous schedule.
pub trait AlarmScheduler: Send + Sync {
    fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), InfraError>;
    fn clear(&self, name: &str) -> Result<bool, InfraError>;
    fn clear_all(&self) -> Result<(), InfraError>;
}

/// Alarms persisted as SQLite rows and delivered over an async channel by
/// [`SqliteAlarmScheduler::run_pump`]. A one-shot alarm that came due while
/// the process was not resident fires on the first pump iteration after
/// startup.
pub struct SqliteAlarmScheduler {
    db_path: PathBuf,
    events: UnboundedSender<String>,
    rearm: Notify,
    log: Arc<EventLog>,
}

impl SqliteAlarmScheduler {
    pub fn new(
        db_path: impl AsRef<Path>,
        log: Arc<EventLog>,
    ) -> (Arc<Self>, UnboundedReceiver<String>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            db_path: db_path.as_ref().to_path_buf(),
            events,
            rearm: Notify::new(),
            log,
        });
        (scheduler, receiver)
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    /// Fires every due alarm: one-shots are deleted, periodic alarms are
    /// re-armed relative to `now` so a long suspension collapses the backlog
    /// into a single firing. Returns the fired names in due order.
    pub fn collect_due(&self, now: DateTime<Utc>) -> Result<Vec<String>, InfraError> {
        let connection = self.connect()?;
        let now_ms = now.timestamp_millis();

        let mut statement = connection.prepare(
            "SELECT name, period_minutes FROM alarms WHERE fire_at_ms <= ?1 ORDER BY fire_at_ms",
        )?;
        let due = statement
            .query_map(params![now_ms], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(statement);

        let mut fired = Vec::with_capacity(due.len());
        for (name, period_minutes) in due {
            match period_minutes {
                Some(minutes) => {
                    let next_ms = now_ms + minutes.max(1) * 60_000;
                    connection.execute(
                        "UPDATE alarms SET fire_at_ms = ?2 WHERE name = ?1",
                        params![name, next_ms],
                    )?;
                }
                None => {
                    connection.execute("DELETE FROM alarms WHERE name = ?1", params![name])?;
                }
            }
            fired.push(name);
        }
        Ok(fired)
    }

    pub fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        let connection = self.connect()?;
        let next_ms: Option<i64> = connection
            .query_row("SELECT MIN(fire_at_ms) FROM alarms", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(next_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Delivery loop; runs for the lifetime of the process and exits when
    /// the receiving side is gone.
    pub async fn run_pump(self: Arc<Self>) {
        loop {
            match self.collect_due(Utc::now()) {
                Ok(fired) => {
                    for name in fired {
                        if self.events.send(name).is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    self.log
                        .error("scheduler", &format!("failed to collect due alarms: {error}"));
                }
            }

            let wait = match self.next_fire_at() {
                Ok(Some(at)) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                Ok(None) => PUMP_IDLE_WAIT,
                Err(error) => {
                    self.log
                        .error("scheduler", &format!("failed to read next alarm: {error}"));
                    PUMP_IDLE_WAIT
                }
            };
            let wait = wait.clamp(PUMP_MIN_WAIT, PUMP_IDLE_WAIT);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.rearm.notified() => {}
            }
        }
    }
}

impl AlarmScheduler for SqliteAlarmScheduler {
    fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), InfraError> {
        let (fire_at_ms, period_minutes) = match schedule {
            AlarmSchedule::Once { at } => (at.timestamp_millis(), None),
            AlarmSchedule::Every { minutes } => {
                let minutes = minutes.max(1) as i64;
                (Utc::now().timestamp_millis() + minutes * 60_000, Some(minutes))
            }
        };

        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO alarms (name, fire_at_ms, period_minutes)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
               fire_at_ms = excluded.fire_at_ms,
               period_minutes = excluded.period_minutes",
            params![name, fire_at_ms, period_minutes],
        )?;
        self.rearm.notify_one();
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM alarms WHERE name = ?1", params![name])?;
        self.rearm.notify_one();
        Ok(removed > 0)
    }

    fn clear_all(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM alarms", [])?;
        self.rearm.notify_one();
        Ok(())
    }
}

/// Recording scheduler for unit tests; nothing ever fires on its own.
#[derive(Debug, Default)]
pub struct InMemoryAlarmScheduler {
    alarms: Mutex<HashMap<String, AlarmSchedule>>,
}

impl InMemoryAlarmScheduler {
    pub fn scheduled(&self, name: &str) -> Option<AlarmSchedule> {
        self.alarms
            .lock()
            .ok()
            .and_then(|alarms| alarms.get(name).copied())
    }

    pub fn len(&self) -> usize {
        self.alarms.lock().map(|alarms| alarms.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlarmScheduler for InMemoryAlarmScheduler {
    fn create(&self, name: &str, schedule: AlarmSchedule) -> Result<(), InfraError> {
        let mut alarms = self
            .alarms
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("alarm lock poisoned: {error}")))?;
        alarms.insert(name.to_string(), schedule);
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<bool, InfraError> {
        let mut alarms = self
            .alarms
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("alarm lock poisoned: {error}")))?;
        Ok(alarms.remove(name).is_some())
    }

    fn clear_all(&self) -> Result<(), InfraError> {
        let mut alarms = self
            .alarms
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("alarm lock poisoned: {error}")))?;
        alarms.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn temp_scheduler() -> (Arc<SqliteAlarmScheduler>, UnboundedReceiver<String>, PathBuf) {
        let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "pomotrack-scheduler-tests-{}-{}.sqlite",
            std::process::id(),
            sequence
        ));
        initialize_database(&path).expect("initialize database");
        let (scheduler, receiver) = SqliteAlarmScheduler::new(&path, Arc::new(EventLog::disabled()));
        (scheduler, receiver, path)
    }

    #[test]
    fn one_shot_alarm_fires_once_and_is_deleted() {
        let (scheduler, _receiver, path) = temp_scheduler();
        let at = fixed_time("2026-03-02T09:25:00Z");
        scheduler
            .create("session-timer", AlarmSchedule::Once { at })
            .expect("create alarm");

        let before = scheduler
            .collect_due(fixed_time("2026-03-02T09:24:59Z"))
            .expect("collect");
        assert!(before.is_empty());

        let due = scheduler.collect_due(at).expect("collect");
        assert_eq!(due, vec!["session-timer".to_string()]);

        let again = scheduler
            .collect_due(fixed_time("2026-03-02T10:00:00Z"))
            .expect("collect");
        assert!(again.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn periodic_alarm_rearms_after_firing() {
        let (scheduler, _receiver, path) = temp_scheduler();
        scheduler
            .create("jira-auto-sync", AlarmSchedule::Every { minutes: 30 })
            .expect("create alarm");

        // Periodic alarms are anchored to the wall clock at creation time.
        let checkpoint = Utc::now() + chrono::Duration::hours(2);
        let first = scheduler.collect_due(checkpoint).expect("collect");
        assert_eq!(first, vec!["jira-auto-sync".to_string()]);

        let next = scheduler
            .next_fire_at()
            .expect("next fire")
            .expect("alarm re-armed");
        assert_eq!(next.timestamp_millis() - checkpoint.timestamp_millis(), 30 * 60_000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn overdue_alarm_survives_scheduler_restart() {
        let (scheduler, _receiver, path) = temp_scheduler();
        let at = fixed_time("2026-03-02T09:25:00Z");
        scheduler
            .create("session-timer", AlarmSchedule::Once { at })
            .expect("create alarm");
        drop(scheduler);

        let (reopened, _receiver) =
            SqliteAlarmScheduler::new(&path, Arc::new(EventLog::disabled()));
        let due = reopened
            .collect_due(fixed_time("2026-03-03T00:00:00Z"))
            .expect("collect");
        assert_eq!(due, vec!["session-timer".to_string()]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clearing_one_name_leaves_the_other_untouched() {
        let (scheduler, _receiver, path) = temp_scheduler();
        scheduler
            .create(
                "session-timer",
                AlarmSchedule::Once {
                    at: fixed_time("2026-03-02T09:25:00Z"),
                },
            )
            .expect("create session alarm");
        scheduler
            .create("jira-auto-sync", AlarmSchedule::Every { minutes: 15 })
            .expect("create sync alarm");

        assert!(scheduler.clear("session-timer").expect("clear"));
        assert!(!scheduler.clear("session-timer").expect("clear again"));

        let due = scheduler
            .collect_due(Utc::now() + chrono::Duration::hours(1))
            .expect("collect");
        assert_eq!(due, vec!["jira-auto-sync".to_string()]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn pump_delivers_due_alarm_over_the_channel() {
        let (scheduler, mut receiver, path) = temp_scheduler();
        scheduler
            .create(
                "session-timer",
                AlarmSchedule::Once {
                    at: fixed_time("2020-01-01T00:00:00Z"),
                },
            )
            .expect("create alarm");

        let pump = tokio::spawn(Arc::clone(&scheduler).run_pump());
        let name = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("pump fired in time")
            .expect("channel open");
        assert_eq!(name, "session-timer");
        pump.abort();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn in_memory_scheduler_records_and_replaces() {
        let scheduler = InMemoryAlarmScheduler::default();
        scheduler
            .create("jira-auto-sync", AlarmSchedule::Every { minutes: 30 })
            .expect("create");
        scheduler
            .create("jira-auto-sync", AlarmSchedule::Every { minutes: 5 })
            .expect("replace");

        assert_eq!(
            scheduler.scheduled("jira-auto-sync"),
            Some(AlarmSchedule::Every { minutes: 5 })
        );
        assert_eq!(scheduler.len(), 1);
        scheduler.clear_all().expect("clear all");
        assert!(scheduler.is_empty());
    }
}
