mod application;
mod domain;
mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    clear_completed_tasks_impl, clear_statistics_impl, complete_tasks_impl, create_task_impl,
    delete_task_impl, delete_tasks_impl, get_state_impl, get_statistics_history_impl,
    handle_idle_change, handle_session_alarm, handle_sync_alarm, import_now_impl,
    list_tasks_impl, pause_timer_impl, reconfigure_sync_impl, reset_timer_impl,
    save_settings_impl, save_ui_preferences_impl, set_current_task_impl, skip_break_impl,
    start_quick_timer_impl, start_timer_impl, toggle_timer_impl, update_task_impl, AppState,
    ImportResponse, StateSnapshot, SyncConfigResponse,
};
use application::session::SESSION_ALARM;
use application::sync::SYNC_ALARM;
use domain::models::{Task, TimerSettings};
use domain::stats::StatsHistory;
use domain::tasks::TaskPatch;
use infrastructure::idle::ActivityState;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tauri::Manager;

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct BootstrapResponse {
    workspace_root: String,
    database_path: String,
}

#[tauri::command]
fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

#[tauri::command]
fn ping() -> &'static str {
    "pong"
}

#[tauri::command]
async fn get_state(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    get_state_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_state", &error))
}

#[tauri::command]
async fn start_timer(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    start_timer_impl(state.inner())
        .await
        .map_err(|error| state.command_error("start_timer", &error))
}

#[tauri::command]
async fn pause_timer(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    pause_timer_impl(state.inner())
        .await
        .map_err(|error| state.command_error("pause_timer", &error))
}

#[tauri::command]
async fn toggle_timer(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    toggle_timer_impl(state.inner())
        .await
        .map_err(|error| state.command_error("toggle_timer", &error))
}

#[tauri::command]
async fn reset_timer(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    reset_timer_impl(state.inner())
        .await
        .map_err(|error| state.command_error("reset_timer", &error))
}

#[tauri::command]
async fn skip_break(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    skip_break_impl(state.inner())
        .await
        .map_err(|error| state.command_error("skip_break", &error))
}

#[tauri::command]
async fn start_quick_timer(
    state: tauri::State<'_, AppState>,
    minutes: u32,
) -> Result<StateSnapshot, String> {
    start_quick_timer_impl(state.inner(), minutes)
        .await
        .map_err(|error| state.command_error("start_quick_timer", &error))
}

#[tauri::command]
async fn save_settings(
    state: tauri::State<'_, AppState>,
    settings: TimerSettings,
) -> Result<StateSnapshot, String> {
    save_settings_impl(state.inner(), settings)
        .await
        .map_err(|error| state.command_error("save_settings", &error))
}

#[tauri::command]
async fn save_ui_preferences(
    state: tauri::State<'_, AppState>,
    preferences: serde_json::Value,
) -> Result<StateSnapshot, String> {
    save_ui_preferences_impl(state.inner(), preferences)
        .await
        .map_err(|error| state.command_error("save_ui_preferences", &error))
}

#[tauri::command]
async fn create_task(
    state: tauri::State<'_, AppState>,
    title: String,
    description: Option<String>,
    estimated_pomodoros: Option<u32>,
) -> Result<StateSnapshot, String> {
    create_task_impl(state.inner(), title, description, estimated_pomodoros)
        .await
        .map_err(|error| state.command_error("create_task", &error))
}

#[tauri::command]
async fn update_task(
    state: tauri::State<'_, AppState>,
    task_id: String,
    patch: TaskPatch,
) -> Result<StateSnapshot, String> {
    update_task_impl(state.inner(), task_id, patch)
        .await
        .map_err(|error| state.command_error("update_task", &error))
}

#[tauri::command]
async fn delete_task(
    state: tauri::State<'_, AppState>,
    task_id: String,
) -> Result<StateSnapshot, String> {
    delete_task_impl(state.inner(), task_id)
        .await
        .map_err(|error| state.command_error("delete_task", &error))
}

#[tauri::command]
async fn delete_tasks(
    state: tauri::State<'_, AppState>,
    task_ids: Vec<String>,
) -> Result<StateSnapshot, String> {
    delete_tasks_impl(state.inner(), task_ids)
        .await
        .map_err(|error| state.command_error("delete_tasks", &error))
}

#[tauri::command]
async fn complete_tasks(
    state: tauri::State<'_, AppState>,
    task_ids: Vec<String>,
) -> Result<StateSnapshot, String> {
    complete_tasks_impl(state.inner(), task_ids)
        .await
        .map_err(|error| state.command_error("complete_tasks", &error))
}

#[tauri::command]
async fn set_current_task(
    state: tauri::State<'_, AppState>,
    task_id: Option<String>,
) -> Result<StateSnapshot, String> {
    set_current_task_impl(state.inner(), task_id)
        .await
        .map_err(|error| state.command_error("set_current_task", &error))
}

#[tauri::command]
async fn clear_completed_tasks(
    state: tauri::State<'_, AppState>,
) -> Result<StateSnapshot, String> {
    clear_completed_tasks_impl(state.inner())
        .await
        .map_err(|error| state.command_error("clear_completed_tasks", &error))
}

#[tauri::command]
async fn list_tasks(state: tauri::State<'_, AppState>) -> Result<Vec<Task>, String> {
    list_tasks_impl(state.inner())
        .await
        .map_err(|error| state.command_error("list_tasks", &error))
}

#[tauri::command]
async fn reconfigure_sync(
    state: tauri::State<'_, AppState>,
) -> Result<SyncConfigResponse, String> {
    reconfigure_sync_impl(state.inner())
        .await
        .map_err(|error| state.command_error("reconfigure_sync", &error))
}

#[tauri::command]
async fn import_now(state: tauri::State<'_, AppState>) -> Result<ImportResponse, String> {
    import_now_impl(state.inner())
        .await
        .map_err(|error| state.command_error("import_now", &error))
}

#[tauri::command]
async fn clear_statistics(state: tauri::State<'_, AppState>) -> Result<StateSnapshot, String> {
    clear_statistics_impl(state.inner())
        .await
        .map_err(|error| state.command_error("clear_statistics", &error))
}

#[tauri::command]
async fn get_statistics_history(
    state: tauri::State<'_, AppState>,
) -> Result<StatsHistory, String> {
    get_statistics_history_impl(state.inner())
        .await
        .map_err(|error| state.command_error("get_statistics_history", &error))
}

pub fn run() {
    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let app_state = AppState::new(workspace_root).expect("failed to initialize app state");

    tauri::Builder::default()
        .manage(app_state)
        .setup(|app| {
            let state = app.state::<AppState>();
            let scheduler = state.scheduler_handle();
            let alarm_events = state.take_alarm_events();

            tauri::async_runtime::spawn(scheduler.run_pump());

            if let Some(mut events) = alarm_events {
                let handle = app.handle().clone();
                tauri::async_runtime::spawn(async move {
                    while let Some(name) = events.recv().await {
                        let state = handle.state::<AppState>();
                        match name.as_str() {
                            SESSION_ALARM => handle_session_alarm(&state).await,
                            SYNC_ALARM => handle_sync_alarm(&state).await,
                            other => {
                                state.log_error("alarm", &format!("unknown alarm fired: {other}"));
                            }
                        }
                    }
                });
            }

            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let mut last = ActivityState::Active;
                loop {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    let state = handle.state::<AppState>();
                    let current = match state.idle_state() {
                        Ok(current) => current,
                        Err(error) => {
                            state.log_error("idle.query", &error.to_string());
                            continue;
                        }
                    };
                    if current != last {
                        state.log_info(
                            "idle",
                            match current {
                                ActivityState::Idle => "user became idle",
                                ActivityState::Active => "user became active",
                            },
                        );
                        handle_idle_change(&state, current).await;
                        last = current;
                    }
                }
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            ping,
            bootstrap,
            get_state,
            start_timer,
            pause_timer,
            toggle_timer,
            reset_timer,
            skip_break,
            start_quick_timer,
            save_settings,
            save_ui_preferences,
            create_task,
            update_task,
            delete_task,
            delete_tasks,
            complete_tasks,
            set_current_task,
            clear_completed_tasks,
            list_tasks,
            reconfigure_sync,
            import_now,
            clear_statistics,
            get_statistics_history
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
