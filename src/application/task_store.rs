use crate::domain::models::Task;
use crate::domain::tasks::{self, TaskPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::EventLog;
use crate::infrastructure::storage::KeyValueStore;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const TASKS_KEY: &str = "tasks";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// The only mutation path for tasks: applies the pure list transforms, then
/// persists the whole list. A failed write is logged and the in-memory list
/// stays authoritative for this process.
pub struct TaskStore<K: KeyValueStore> {
    store: Arc<K>,
    log: Arc<EventLog>,
    tasks: Vec<Task>,
}

impl<K: KeyValueStore> TaskStore<K> {
    pub fn new(store: Arc<K>, log: Arc<EventLog>) -> Self {
        let tasks = match store.get(TASKS_KEY) {
            Ok(Some(value)) => decode_tasks(value),
            Ok(None) => Vec::new(),
            Err(error) => {
                log.error("tasks.load", &error.to_string());
                Vec::new()
            }
        };
        Self { store, log, tasks }
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }

    pub fn create(
        &mut self,
        title: &str,
        description: Option<String>,
        estimated_pomodoros: Option<u32>,
    ) -> Result<Task, InfraError> {
        if title.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "title must not be empty".to_string(),
            ));
        }
        let task = tasks::create(
            &mut self.tasks,
            next_id("tsk"),
            title,
            description,
            estimated_pomodoros,
            Utc::now(),
        );
        self.persist();
        Ok(task)
    }

    /// Import path used by the sync orchestrator; estimates default to one
    /// pomodoro.
    pub fn create_imported(&mut self, title: &str) -> Task {
        let task = tasks::create(
            &mut self.tasks,
            next_id("tsk"),
            title,
            None,
            Some(1),
            Utc::now(),
        );
        self.persist();
        task
    }

    pub fn update(&mut self, id: &str, patch: TaskPatch) -> Result<Task, InfraError> {
        match tasks::update(&mut self.tasks, id, patch, Utc::now()) {
            Some(task) => {
                self.persist();
                Ok(task)
            }
            None => Err(InfraError::InvalidConfig(format!("task not found: {id}"))),
        }
    }

    pub fn complete_many(&mut self, ids: &[String]) -> usize {
        let changed = tasks::complete_many(&mut self.tasks, ids, Utc::now());
        if changed > 0 {
            self.persist();
        }
        changed
    }

    pub fn delete_many(&mut self, ids: &[String]) -> usize {
        let removed = tasks::delete_many(&mut self.tasks, ids);
        if removed > 0 {
            self.persist();
        }
        removed
    }

    pub fn increment_pomodoro(&mut self, id: &str) -> Option<Task> {
        let updated = tasks::increment_pomodoro(&mut self.tasks, id);
        if updated.is_some() {
            self.persist();
        }
        updated
    }

    pub fn clear_completed(&mut self) -> usize {
        let removed = tasks::clear_completed(&mut self.tasks);
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn persist(&self) {
        let value = match serde_json::to_value(&self.tasks) {
            Ok(value) => value,
            Err(error) => {
                self.log.error("tasks.persist", &error.to_string());
                return;
            }
        };
        if let Err(error) = self.store.set(TASKS_KEY, &value) {
            self.log.error("tasks.persist", &error.to_string());
        }
    }
}

fn decode_tasks(value: serde_json::Value) -> Vec<Task> {
    if !value.is_array() {
        return Vec::new();
    }
    serde_json::from_value(value).unwrap_or_default()
}
