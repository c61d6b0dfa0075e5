use crate::application::bootstrap::bootstrap_workspace;
use crate::application::session::SessionController;
use crate::application::statistics::StatsAggregator;
use crate::application::sync::{SyncOrchestrator, SyncOutcome};
use crate::application::task_store::TaskStore;
use crate::domain::models::{remaining_seconds, Task, TimerSettings};
use crate::domain::stats::StatsHistory;
use crate::domain::tasks::TaskPatch;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::idle::{
    ActivityState, HeartbeatIdleMonitor, IdleMonitor, IDLE_THRESHOLD_SECS,
};
use crate::infrastructure::jira_client::ReqwestJiraClient;
use crate::infrastructure::logging::EventLog;
use crate::infrastructure::notify::EventLogNotifier;
use crate::infrastructure::scheduler::SqliteAlarmScheduler;
use crate::infrastructure::storage::{KeyValueStore, SqliteKeyValueStore};
use chrono::{Local, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

pub const UI_PREFERENCES_KEY: &str = "ui_preferences";

type Controller =
    SessionController<SqliteKeyValueStore, SqliteAlarmScheduler, EventLogNotifier>;
type Orchestrator = SyncOrchestrator<ReqwestJiraClient, SqliteAlarmScheduler>;

/// Everything a command can mutate, behind one FIFO lock so commands run to
/// completion in arrival order.
pub struct AppCore {
    controller: Controller,
    tasks: TaskStore<SqliteKeyValueStore>,
    stats: StatsAggregator<SqliteKeyValueStore>,
    ui_preferences: serde_json::Value,
}

pub struct AppState {
    log: Arc<EventLog>,
    store: Arc<SqliteKeyValueStore>,
    scheduler: Arc<SqliteAlarmScheduler>,
    idle_monitor: Arc<HeartbeatIdleMonitor>,
    core: Mutex<AppCore>,
    alarm_events: StdMutex<Option<UnboundedReceiver<String>>>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let log = Arc::new(EventLog::new(bootstrap.logs_dir.clone()));
        let store = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        let (scheduler, alarm_events) =
            SqliteAlarmScheduler::new(&bootstrap.database_path, Arc::clone(&log));
        let notifier = Arc::new(EventLogNotifier::new(Arc::clone(&log)));
        let idle_monitor = Arc::new(HeartbeatIdleMonitor::new());

        let mut controller = SessionController::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            notifier,
            Arc::clone(&log),
        );
        let tasks = TaskStore::new(Arc::clone(&store), Arc::clone(&log));
        let stats = StatsAggregator::new(Arc::clone(&store), Arc::clone(&log));
        let ui_preferences = load_ui_preferences(store.as_ref(), &log);

        // The monitor starts from "just active", so a sticky idle marker
        // left by the previous process run is released here.
        match idle_monitor.query_state(IDLE_THRESHOLD_SECS) {
            Ok(ActivityState::Active) => controller.clear_idle_carryover(),
            Ok(ActivityState::Idle) => {}
            Err(error) => log.error("idle.query", &error.to_string()),
        }

        let sync = Orchestrator::new(
            Arc::new(ReqwestJiraClient::new()),
            Arc::clone(&scheduler),
            Arc::clone(&log),
        );
        if let Err(error) = sync.configure_alarm(&controller.settings().jira) {
            log.error("sync.configure", &error.to_string());
        }

        Ok(Self {
            log,
            store,
            scheduler,
            idle_monitor,
            core: Mutex::new(AppCore {
                controller,
                tasks,
                stats,
                ui_preferences,
            }),
            alarm_events: StdMutex::new(Some(alarm_events)),
        })
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log.error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, scope: &str, message: &str) {
        self.log.info(scope, message);
    }

    pub fn log_error(&self, scope: &str, message: &str) {
        self.log.error(scope, message);
    }

    /// Command traffic doubles as the user-activity heartbeat.
    fn touch_activity(&self) {
        self.idle_monitor.touch();
    }

    pub fn idle_state(&self) -> Result<ActivityState, InfraError> {
        self.idle_monitor.query_state(IDLE_THRESHOLD_SECS)
    }

    pub fn scheduler_handle(&self) -> Arc<SqliteAlarmScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// The alarm delivery channel; taken once by the dispatcher loop.
    pub fn take_alarm_events(&self) -> Option<UnboundedReceiver<String>> {
        self.alarm_events.lock().ok().and_then(|mut slot| slot.take())
    }

    fn sync_orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ReqwestJiraClient::new()),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.log),
        )
    }
}

fn default_ui_preferences() -> serde_json::Value {
    serde_json::json!({
        "theme": "system",
        "show_seconds": true,
        "compact_mode": false,
    })
}

fn merge_ui_preferences(stored: Option<serde_json::Value>) -> serde_json::Value {
    let mut merged = default_ui_preferences();
    if let Some(serde_json::Value::Object(overrides)) = stored {
        let target = merged
            .as_object_mut()
            .expect("default ui preferences are an object");
        for (key, value) in overrides {
            target.insert(key, value);
        }
    }
    merged
}

fn load_ui_preferences(store: &SqliteKeyValueStore, log: &EventLog) -> serde_json::Value {
    match store.get(UI_PREFERENCES_KEY) {
        Ok(stored) => merge_ui_preferences(stored),
        Err(error) => {
            log.error("ui.load", &error.to_string());
            default_ui_preferences()
        }
    }
}

/// Client-visible view returned by every mutating command.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub is_running: bool,
    pub time_left: u32,
    pub current_session: u32,
    pub is_work_session: bool,
    pub was_paused_for_idle: bool,
    pub settings: TimerSettings,
    pub current_task_id: Option<String>,
    pub completed_today: u32,
    pub focus_time_today: u32,
    pub tasks: Vec<Task>,
    pub ui_preferences: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncConfigResponse {
    pub registered: bool,
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub outcome: SyncOutcome,
    pub state: StateSnapshot,
}

fn snapshot(core: &AppCore) -> StateSnapshot {
    let state = core.controller.state();
    // While running, the displayed countdown is derived from the deadline.
    let time_left = state
        .end_time
        .map(|end_time| remaining_seconds(end_time, Utc::now()))
        .unwrap_or(state.time_left);
    let today = core.stats.day(Local::now().date_naive());

    StateSnapshot {
        is_running: state.is_running,
        time_left,
        current_session: state.current_session,
        is_work_session: state.is_work_session,
        was_paused_for_idle: state.was_paused_for_idle,
        settings: state.settings.clone(),
        current_task_id: state.current_task_id.clone(),
        completed_today: today.completed,
        focus_time_today: today.focus_minutes,
        tasks: core.tasks.list().to_vec(),
        ui_preferences: core.ui_preferences.clone(),
    }
}

/// Drops a dangling current-task selection after bulk removals.
fn reconcile_current_task(core: &mut AppCore) {
    if let Some(task_id) = core.controller.state().current_task_id.clone() {
        if !core.tasks.contains(&task_id) {
            core.controller.clear_current_task_if(&task_id);
        }
    }
}

pub async fn get_state_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let core = state.core.lock().await;
    Ok(snapshot(&core))
}

pub async fn start_timer_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.start();
    Ok(snapshot(&core))
}

pub async fn pause_timer_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.pause();
    Ok(snapshot(&core))
}

pub async fn toggle_timer_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.toggle();
    Ok(snapshot(&core))
}

pub async fn reset_timer_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.reset();
    Ok(snapshot(&core))
}

pub async fn skip_break_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.skip_break()?;
    Ok(snapshot(&core))
}

pub async fn start_quick_timer_impl(
    state: &AppState,
    minutes: u32,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.start_quick_timer(minutes)?;
    Ok(snapshot(&core))
}

pub async fn save_settings_impl(
    state: &AppState,
    settings: TimerSettings,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.controller.save_settings(settings);

    // Sync settings may have changed; a failed alarm registration must not
    // fail the save itself.
    let sync = state.sync_orchestrator();
    if let Err(error) = sync.configure_alarm(&core.controller.settings().jira) {
        state.log.error("sync.configure", &error.to_string());
    }
    Ok(snapshot(&core))
}

pub async fn save_ui_preferences_impl(
    state: &AppState,
    preferences: serde_json::Value,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let serde_json::Value::Object(overrides) = preferences else {
        return Err(InfraError::InvalidConfig(
            "ui preferences must be an object".to_string(),
        ));
    };

    let mut core = state.core.lock().await;
    let target = core
        .ui_preferences
        .as_object_mut()
        .expect("ui preferences are an object");
    for (key, value) in overrides {
        target.insert(key, value);
    }
    if let Err(error) = state.store.set(UI_PREFERENCES_KEY, &core.ui_preferences) {
        state.log.error("ui.persist", &error.to_string());
    }
    Ok(snapshot(&core))
}

pub async fn create_task_impl(
    state: &AppState,
    title: String,
    description: Option<String>,
    estimated_pomodoros: Option<u32>,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.tasks.create(&title, description, estimated_pomodoros)?;
    Ok(snapshot(&core))
}

pub async fn update_task_impl(
    state: &AppState,
    task_id: String,
    patch: TaskPatch,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.tasks.update(task_id.trim(), patch)?;
    Ok(snapshot(&core))
}

pub async fn delete_task_impl(
    state: &AppState,
    task_id: String,
) -> Result<StateSnapshot, InfraError> {
    delete_tasks_impl(state, vec![task_id]).await
}

pub async fn delete_tasks_impl(
    state: &AppState,
    task_ids: Vec<String>,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.tasks.delete_many(&task_ids);
    reconcile_current_task(&mut core);
    Ok(snapshot(&core))
}

pub async fn complete_tasks_impl(
    state: &AppState,
    task_ids: Vec<String>,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.tasks.complete_many(&task_ids);
    Ok(snapshot(&core))
}

pub async fn set_current_task_impl(
    state: &AppState,
    task_id: Option<String>,
) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    let normalized = task_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    if let Some(task_id) = normalized.as_deref() {
        if !core.tasks.contains(task_id) {
            return Err(InfraError::InvalidConfig(format!(
                "task not found: {task_id}"
            )));
        }
    }
    core.controller.set_current_task(normalized);
    Ok(snapshot(&core))
}

pub async fn clear_completed_tasks_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.tasks.clear_completed();
    reconcile_current_task(&mut core);
    Ok(snapshot(&core))
}

pub async fn list_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    state.touch_activity();
    let core = state.core.lock().await;
    Ok(core.tasks.list().to_vec())
}

pub async fn reconfigure_sync_impl(state: &AppState) -> Result<SyncConfigResponse, InfraError> {
    state.touch_activity();
    let core = state.core.lock().await;
    let sync = state.sync_orchestrator();
    let registered = sync.configure_alarm(&core.controller.settings().jira)?;
    Ok(SyncConfigResponse {
        registered,
        state: snapshot(&core),
    })
}

pub async fn import_now_impl(state: &AppState) -> Result<ImportResponse, InfraError> {
    state.touch_activity();
    let sync = state.sync_orchestrator();
    let mut core = state.core.lock().await;
    let settings = core.controller.settings().jira.clone();
    let outcome = sync.perform_sync(&settings, &mut core.tasks).await?;
    Ok(ImportResponse {
        outcome,
        state: snapshot(&core),
    })
}

pub async fn clear_statistics_impl(state: &AppState) -> Result<StateSnapshot, InfraError> {
    state.touch_activity();
    let mut core = state.core.lock().await;
    core.stats.clear();
    Ok(snapshot(&core))
}

pub async fn get_statistics_history_impl(
    state: &AppState,
) -> Result<StatsHistory, InfraError> {
    state.touch_activity();
    let core = state.core.lock().await;
    Ok(core.stats.history().clone())
}

/// Session alarm callback delivered by the scheduler pump.
pub async fn handle_session_alarm(state: &AppState) {
    let mut core = state.core.lock().await;
    let AppCore {
        controller,
        tasks,
        stats,
        ..
    } = &mut *core;
    controller.on_timer_complete(tasks, stats);
}

/// Recurring sync alarm callback. Failures are logged; the dispatcher loop
/// must survive any sync outcome.
pub async fn handle_sync_alarm(state: &AppState) {
    let sync = state.sync_orchestrator();
    let mut core = state.core.lock().await;
    let settings = core.controller.settings().jira.clone();
    if !settings.auto_sync {
        return;
    }
    match sync.perform_sync(&settings, &mut core.tasks).await {
        Ok(outcome) => state.log.info(
            "sync.alarm",
            &format!(
                "scheduled sync imported {} of {} issues",
                outcome.imported, outcome.fetched
            ),
        ),
        Err(error) => state.log.error("sync.alarm", &error.to_string()),
    }
}

pub async fn handle_idle_change(state: &AppState, activity: ActivityState) {
    let mut core = state.core.lock().await;
    core.controller.handle_idle_transition(activity);
}
