use crate::application::statistics::StatsAggregator;
use crate::application::task_store::TaskStore;
use crate::domain::models::{remaining_seconds, SessionState, TimerSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::idle::ActivityState;
use crate::infrastructure::logging::EventLog;
use crate::infrastructure::notify::Notifier;
use crate::infrastructure::scheduler::{AlarmSchedule, AlarmScheduler};
use crate::infrastructure::storage::KeyValueStore;
use chrono::{DateTime, Duration, Local, Utc};
use std::sync::Arc;

/// Alarm identity for the session countdown. Must never be shared with the
/// recurring sync alarm.
pub const SESSION_ALARM: &str = "session-timer";
pub const SESSION_STATE_KEY: &str = "session";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Rebuilds the session from a persisted blob. Settings merge over defaults
/// field by field; when an absolute deadline was stored the countdown is
/// recomputed from it instead of trusting the stored `time_left`.
pub fn recover_session_state(raw: Option<serde_json::Value>, now: DateTime<Utc>) -> SessionState {
    let mut state = raw
        .and_then(|value| serde_json::from_value::<SessionState>(value).ok())
        .unwrap_or_default();
    state.settings = state.settings.normalized();

    if let Some(end_time) = state.end_time {
        state.time_left = remaining_seconds(end_time, now);
        if !state.is_running {
            state.end_time = None;
        }
    } else if state.is_running {
        state.is_running = false;
    }
    if state.current_session == 0 {
        state.current_session = 1;
    }
    state
}

/// Owns the single session instance and drives every transition. Each
/// mutating entry point ends in a persistence write; a failed write is
/// logged and the in-memory state stays authoritative for this process.
pub struct SessionController<K, S, N>
where
    K: KeyValueStore,
    S: AlarmScheduler,
    N: Notifier,
{
    state: SessionState,
    store: Arc<K>,
    scheduler: Arc<S>,
    notifier: Arc<N>,
    log: Arc<EventLog>,
    now_provider: NowProvider,
}

impl<K, S, N> SessionController<K, S, N>
where
    K: KeyValueStore,
    S: AlarmScheduler,
    N: Notifier,
{
    pub fn new(store: Arc<K>, scheduler: Arc<S>, notifier: Arc<N>, log: Arc<EventLog>) -> Self {
        let raw = store.get(SESSION_STATE_KEY).unwrap_or_else(|error| {
            log.error("session.load", &error.to_string());
            None
        });
        let state = recover_session_state(raw, Utc::now());
        Self {
            state,
            store,
            scheduler,
            notifier,
            log,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.state.settings
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn start(&mut self) {
        if self.state.is_running {
            return;
        }
        let end_time = self.now() + Duration::seconds(self.state.time_left as i64);
        self.schedule_wakeup(end_time);
        self.state.end_time = Some(end_time);
        self.state.is_running = true;
        self.persist();
    }

    pub fn pause(&mut self) {
        if !self.state.is_running {
            return;
        }
        // Cancel before touching state so a stale wake-up cannot race the
        // mutation.
        self.cancel_wakeup();
        let now = self.now();
        if let Some(end_time) = self.state.end_time.take() {
            self.state.time_left = remaining_seconds(end_time, now);
        }
        self.state.is_running = false;
        self.persist();
    }

    pub fn toggle(&mut self) {
        if self.state.is_running {
            self.pause();
        } else {
            self.start();
        }
    }

    pub fn reset(&mut self) {
        self.cancel_wakeup();
        let work_secs = self.state.settings.work_secs();
        self.state.current_session = 1;
        self.state.is_work_session = true;
        self.state.is_running = false;
        self.state.end_time = None;
        self.state.was_paused_for_idle = false;
        self.state.time_left = work_secs;
        self.state.session_total_secs = work_secs;
        self.persist();
    }

    /// Wake-up handler for the session alarm. A fire that arrives after the
    /// countdown was cancelled or changed is ignored.
    pub fn on_timer_complete(
        &mut self,
        tasks: &mut TaskStore<K>,
        stats: &mut StatsAggregator<K>,
    ) {
        if !self.state.is_running || self.state.end_time.is_none() {
            self.log.info("session.complete", "ignoring stale wake-up");
            return;
        }
        let now = self.now();
        self.state.end_time = None;

        let (next_secs, title, message) = if self.state.is_work_session {
            let today = now.with_timezone(&Local).date_naive();
            stats.record_completion(today);
            stats.record_focus_minutes(today, self.state.session_total_secs.div_ceil(60));
            if let Some(task_id) = self.state.current_task_id.clone() {
                tasks.increment_pomodoro(&task_id);
            }

            let long_break = self
                .state
                .settings
                .is_long_break_session(self.state.current_session);
            self.state.is_work_session = false;
            if long_break {
                (
                    self.state.settings.long_break_secs(),
                    "Focus session complete",
                    "Time for a long break.",
                )
            } else {
                (
                    self.state.settings.short_break_secs(),
                    "Focus session complete",
                    "Time for a short break.",
                )
            }
        } else {
            self.state.current_session += 1;
            self.state.is_work_session = true;
            (
                self.state.settings.work_secs(),
                "Break over",
                "Time to focus.",
            )
        };

        self.state.time_left = next_secs;
        self.state.session_total_secs = next_secs;
        self.state.is_running = self.state.settings.auto_start;
        if self.state.is_running {
            let end_time = now + Duration::seconds(next_secs as i64);
            self.schedule_wakeup(end_time);
            self.state.end_time = Some(end_time);
        }

        self.dispatch_notification(title, message);
        self.persist();
    }

    /// User-initiated equivalent of the break-complete branch. Keeps the
    /// timer running when it already was, otherwise follows `auto_start`.
    pub fn skip_break(&mut self) -> Result<(), InfraError> {
        if self.state.is_work_session {
            return Err(InfraError::InvalidConfig(
                "no break in progress to skip".to_string(),
            ));
        }
        let was_running = self.state.is_running;
        self.cancel_wakeup();
        let now = self.now();

        self.state.current_session += 1;
        self.state.is_work_session = true;
        let work_secs = self.state.settings.work_secs();
        self.state.time_left = work_secs;
        self.state.session_total_secs = work_secs;
        self.state.end_time = None;
        self.state.is_running = was_running || self.state.settings.auto_start;
        if self.state.is_running {
            let end_time = now + Duration::seconds(work_secs as i64);
            self.schedule_wakeup(end_time);
            self.state.end_time = Some(end_time);
        }
        self.persist();
        Ok(())
    }

    /// Force-enters a running work session of arbitrary length, bypassing
    /// the configured duration table.
    pub fn start_quick_timer(&mut self, minutes: u32) -> Result<(), InfraError> {
        if minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "quick timer minutes must be >= 1".to_string(),
            ));
        }
        self.cancel_wakeup();
        let now = self.now();
        let secs = minutes * 60;

        self.state.is_work_session = true;
        self.state.time_left = secs;
        self.state.session_total_secs = secs;
        self.state.is_running = true;
        let end_time = now + Duration::seconds(secs as i64);
        self.schedule_wakeup(end_time);
        self.state.end_time = Some(end_time);
        self.persist();
        Ok(())
    }

    /// Replaces the settings and snaps the countdown to the full duration of
    /// the current session kind under the new values. Switching durations
    /// mid-session intentionally discards elapsed time.
    pub fn save_settings(&mut self, settings: TimerSettings) {
        self.state.settings = settings.normalized();

        let next_secs = if self.state.is_work_session {
            self.state.settings.work_secs()
        } else if self
            .state
            .settings
            .is_long_break_session(self.state.current_session)
        {
            self.state.settings.long_break_secs()
        } else {
            self.state.settings.short_break_secs()
        };
        self.state.time_left = next_secs;
        self.state.session_total_secs = next_secs;

        if self.state.is_running {
            self.cancel_wakeup();
            let end_time = self.now() + Duration::seconds(next_secs as i64);
            self.schedule_wakeup(end_time);
            self.state.end_time = Some(end_time);
        }
        self.persist();
    }

    pub fn set_current_task(&mut self, task_id: Option<String>) {
        self.state.current_task_id = task_id;
        self.persist();
    }

    pub fn clear_current_task_if(&mut self, task_id: &str) {
        if self.state.current_task_id.as_deref() == Some(task_id) {
            self.state.current_task_id = None;
            self.persist();
        }
    }

    pub fn handle_idle_transition(&mut self, activity: ActivityState) {
        match activity {
            ActivityState::Idle => {
                if self.state.is_running && self.state.settings.pause_on_idle {
                    self.pause();
                    self.state.was_paused_for_idle = true;
                    self.persist();
                }
            }
            ActivityState::Active => self.clear_idle_carryover(),
        }
    }

    /// Clears the sticky idle marker once activity is observed again. Never
    /// restarts the countdown; the user must do that explicitly.
    pub fn clear_idle_carryover(&mut self) {
        if self.state.was_paused_for_idle && self.state.settings.pause_on_idle {
            self.state.was_paused_for_idle = false;
            self.persist();
        }
    }

    fn dispatch_notification(&self, title: &str, message: &str) {
        if !self.state.settings.notifications_enabled {
            return;
        }
        self.notifier.show(title, message);
    }

    fn schedule_wakeup(&self, end_time: DateTime<Utc>) {
        if let Err(error) = self
            .scheduler
            .create(SESSION_ALARM, AlarmSchedule::Once { at: end_time })
        {
            self.log
                .error("session.schedule", &format!("failed to schedule wake-up: {error}"));
        }
    }

    fn cancel_wakeup(&self) {
        if let Err(error) = self.scheduler.clear(SESSION_ALARM) {
            self.log
                .error("session.schedule", &format!("failed to cancel wake-up: {error}"));
        }
    }

    fn persist(&self) {
        let value = match serde_json::to_value(&self.state) {
            Ok(value) => value,
            Err(error) => {
                self.log.error("session.persist", &error.to_string());
                return;
            }
        };
        if let Err(error) = self.store.set(SESSION_STATE_KEY, &value) {
            self.log.error("session.persist", &error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::notify::RecordingNotifier;
    use crate::infrastructure::scheduler::InMemoryAlarmScheduler;
    use crate::infrastructure::storage::InMemoryKeyValueStore;

    struct Harness {
        controller:
            SessionController<InMemoryKeyValueStore, InMemoryAlarmScheduler, RecordingNotifier>,
        store: Arc<InMemoryKeyValueStore>,
        scheduler: Arc<InMemoryAlarmScheduler>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn harness_at(now: &str) -> Harness {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let scheduler = Arc::new(InMemoryAlarmScheduler::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let log = Arc::new(EventLog::disabled());
        let now = fixed_time(now);
        let controller = SessionController::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&notifier),
            log,
        )
        .with_now_provider(Arc::new(move || now));
        Harness {
            controller,
            store,
            scheduler,
            notifier,
        }
    }

    fn side_stores(
        store: &Arc<InMemoryKeyValueStore>,
    ) -> (
        TaskStore<InMemoryKeyValueStore>,
        StatsAggregator<InMemoryKeyValueStore>,
    ) {
        let log = Arc::new(EventLog::disabled());
        (
            TaskStore::new(Arc::clone(store), Arc::clone(&log)),
            StatsAggregator::new(Arc::clone(store), log),
        )
    }

    #[test]
    fn start_schedules_the_wakeup_at_the_deadline() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start();

        let state = harness.controller.state();
        assert!(state.is_running);
        let expected_end = fixed_time("2026-03-02T09:25:00Z");
        assert_eq!(state.end_time, Some(expected_end));
        assert_eq!(
            harness.scheduler.scheduled(SESSION_ALARM),
            Some(AlarmSchedule::Once { at: expected_end })
        );
        assert!(state.validate().is_ok());
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start();
        let first_end = harness.controller.state().end_time;
        harness.controller.start();
        assert_eq!(harness.controller.state().end_time, first_end);
    }

    #[test]
    fn pause_cancels_the_wakeup_and_freezes_time_left() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start();
        harness.controller.pause();

        let state = harness.controller.state();
        assert!(!state.is_running);
        assert_eq!(state.end_time, None);
        assert_eq!(state.time_left, 25 * 60);
        assert!(harness.scheduler.scheduled(SESSION_ALARM).is_none());
        assert!(state.validate().is_ok());
    }

    #[test]
    fn work_completion_enters_short_break_and_records_stats() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let state = harness.controller.state();
        assert!(!state.is_work_session);
        assert_eq!(state.time_left, 5 * 60);
        assert!(!state.is_running);
        assert_eq!(state.current_session, 1);

        let today = fixed_time("2026-03-02T09:00:00Z")
            .with_timezone(&Local)
            .date_naive();
        let day = stats.day(today);
        assert_eq!(day.completed, 1);
        assert_eq!(day.focus_minutes, 25);
        assert_eq!(harness.notifier.shown().len(), 1);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn fourth_session_completion_enters_the_long_break() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);

        // Walk the cycle to current_session = 4, then finish that work block.
        for _ in 0..3 {
            harness.controller.start();
            harness
                .controller
                .on_timer_complete(&mut tasks, &mut stats);
            harness.controller.start();
            harness
                .controller
                .on_timer_complete(&mut tasks, &mut stats);
        }
        assert_eq!(harness.controller.state().current_session, 4);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let state = harness.controller.state();
        assert!(!state.is_work_session);
        assert_eq!(state.time_left, state.settings.long_break_duration * 60);
    }

    #[test]
    fn break_completion_increments_the_session_counter() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let state = harness.controller.state();
        assert!(state.is_work_session);
        assert_eq!(state.current_session, 2);
        assert_eq!(state.time_left, 25 * 60);
    }

    #[test]
    fn auto_start_chains_the_next_session() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        let mut settings = harness.controller.settings().clone();
        settings.auto_start = true;
        harness.controller.save_settings(settings);

        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let state = harness.controller.state();
        assert!(state.is_running);
        assert!(state.end_time.is_some());
        assert!(harness.scheduler.scheduled(SESSION_ALARM).is_some());
        // Notification fires regardless of auto-start.
        assert_eq!(harness.notifier.shown().len(), 1);
    }

    #[test]
    fn stale_wakeup_after_pause_is_ignored() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness.controller.pause();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let state = harness.controller.state();
        assert!(state.is_work_session);
        assert_eq!(state.time_left, 25 * 60);
        assert!(harness.notifier.shown().is_empty());
    }

    #[test]
    fn work_completion_credits_the_current_task() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        let task = tasks.create("Deep work", None, Some(3)).expect("create");
        harness.controller.set_current_task(Some(task.id.clone()));

        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let updated = tasks
            .list()
            .iter()
            .find(|candidate| candidate.id == task.id)
            .expect("task exists");
        assert_eq!(updated.completed_pomodoros, 1);
        assert!(!updated.is_completed);
    }

    #[test]
    fn skip_break_requires_a_break() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        assert!(harness.controller.skip_break().is_err());
    }

    #[test]
    fn skip_break_preserves_a_running_timer() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);
        harness.controller.start(); // run the break
        harness.controller.skip_break().expect("skip break");

        let state = harness.controller.state();
        assert!(state.is_work_session);
        assert_eq!(state.current_session, 2);
        assert!(state.is_running);
        assert_eq!(state.time_left, 25 * 60);
    }

    #[test]
    fn skip_break_while_paused_follows_auto_start() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);
        harness.controller.skip_break().expect("skip break");

        let state = harness.controller.state();
        assert!(state.is_work_session);
        assert!(!state.is_running);
        assert_eq!(state.end_time, None);
    }

    #[test]
    fn quick_timer_overrides_the_duration_table() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start_quick_timer(10).expect("quick timer");

        let state = harness.controller.state();
        assert!(state.is_running);
        assert!(state.is_work_session);
        assert_eq!(state.time_left, 600);
        assert_eq!(state.session_total_secs, 600);
        assert_eq!(
            state.end_time,
            Some(fixed_time("2026-03-02T09:10:00Z"))
        );
        assert!(harness.controller.start_quick_timer(0).is_err());
    }

    #[test]
    fn quick_timer_completion_credits_its_own_length() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start_quick_timer(10).expect("quick timer");
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);

        let today = fixed_time("2026-03-02T09:00:00Z")
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(stats.day(today).focus_minutes, 10);
    }

    #[test]
    fn save_settings_snaps_time_left_to_the_new_duration() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start();

        let mut settings = harness.controller.settings().clone();
        settings.work_duration = 30;
        harness.controller.save_settings(settings);

        let state = harness.controller.state();
        assert_eq!(state.time_left, 1800);
        assert!(state.is_running);
        assert_eq!(
            state.end_time,
            Some(fixed_time("2026-03-02T09:30:00Z"))
        );
    }

    #[test]
    fn reset_returns_to_the_first_work_session() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let (mut tasks, mut stats) = side_stores(&harness.store);
        harness.controller.start();
        harness
            .controller
            .on_timer_complete(&mut tasks, &mut stats);
        harness.controller.start();
        harness.controller.reset();

        let state = harness.controller.state();
        assert_eq!(state.current_session, 1);
        assert!(state.is_work_session);
        assert!(!state.is_running);
        assert_eq!(state.time_left, 25 * 60);
        assert!(harness.scheduler.scheduled(SESSION_ALARM).is_none());
    }

    #[test]
    fn idle_while_running_pauses_and_sets_the_sticky_marker() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        let mut settings = harness.controller.settings().clone();
        settings.pause_on_idle = true;
        harness.controller.save_settings(settings);
        harness.controller.start();

        harness
            .controller
            .handle_idle_transition(ActivityState::Idle);

        let state = harness.controller.state();
        assert!(!state.is_running);
        assert!(state.was_paused_for_idle);
        assert!(harness.scheduler.scheduled(SESSION_ALARM).is_none());

        harness
            .controller
            .handle_idle_transition(ActivityState::Active);
        let state = harness.controller.state();
        assert!(!state.was_paused_for_idle);
        // Activity clears the marker without restarting the countdown.
        assert!(!state.is_running);
    }

    #[test]
    fn idle_is_ignored_when_the_setting_is_off() {
        let mut harness = harness_at("2026-03-02T09:00:00Z");
        harness.controller.start();
        harness
            .controller
            .handle_idle_transition(ActivityState::Idle);

        assert!(harness.controller.state().is_running);
        assert!(!harness.controller.state().was_paused_for_idle);
    }

    #[test]
    fn recovery_recomputes_time_left_from_the_deadline() {
        let started = fixed_time("2026-03-02T09:00:00Z");
        let mut state = SessionState::default();
        state.is_running = true;
        state.end_time = Some(started + Duration::seconds(1500));
        state.time_left = 1500;
        let raw = serde_json::to_value(&state).expect("serialize");

        let mid = recover_session_state(
            Some(raw.clone()),
            started + Duration::seconds(600),
        );
        assert_eq!(mid.time_left, 900);
        assert!(mid.is_running);

        let late = recover_session_state(Some(raw), started + Duration::seconds(9000));
        assert_eq!(late.time_left, 0);
    }

    #[test]
    fn recovery_trusts_time_left_without_a_deadline() {
        let mut state = SessionState::default();
        state.time_left = 321;
        let raw = serde_json::to_value(&state).expect("serialize");

        let recovered =
            recover_session_state(Some(raw), fixed_time("2026-03-02T09:00:00Z"));
        assert_eq!(recovered.time_left, 321);
        assert!(!recovered.is_running);
    }

    #[test]
    fn recovery_survives_garbage_blobs() {
        let recovered = recover_session_state(
            Some(serde_json::json!("not an object")),
            fixed_time("2026-03-02T09:00:00Z"),
        );
        assert_eq!(recovered, SessionState::default());
        assert!(recovered.validate().is_ok());
    }

    #[test]
    fn controller_reload_roundtrips_through_the_store() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let scheduler = Arc::new(InMemoryAlarmScheduler::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let log = Arc::new(EventLog::disabled());
        {
            let mut controller = SessionController::new(
                Arc::clone(&store),
                Arc::clone(&scheduler),
                Arc::clone(&notifier),
                Arc::clone(&log),
            );
            controller.set_current_task(Some("tsk-9".to_string()));
            controller.start();
            controller.pause();
        }

        let reloaded = SessionController::new(store, scheduler, notifier, log);
        assert_eq!(
            reloaded.state().current_task_id.as_deref(),
            Some("tsk-9")
        );
        assert!(!reloaded.state().is_running);
    }
}
