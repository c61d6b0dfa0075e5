use crate::domain::models::Task;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Partial update applied by [`update`]. `completed_at` is accepted for wire
/// compatibility but never honored directly; it is always derived from
/// `is_completed`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub estimated_pomodoros: Option<u32>,
    pub completed_pomodoros: Option<u32>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Case-insensitive, whitespace-insensitive identity used for import dedup.
pub fn normalized_title(title: &str) -> String {
    title.trim().to_lowercase()
}

pub fn create(
    tasks: &mut Vec<Task>,
    id: String,
    title: &str,
    description: Option<String>,
    estimated_pomodoros: Option<u32>,
    now: DateTime<Utc>,
) -> Task {
    let task = Task {
        id,
        title: title.trim().to_string(),
        description: description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        estimated_pomodoros: estimated_pomodoros.unwrap_or(1).max(1),
        completed_pomodoros: 0,
        is_completed: false,
        created_at: now,
        completed_at: None,
    };
    tasks.push(task.clone());
    task
}

pub fn update(tasks: &mut [Task], id: &str, patch: TaskPatch, now: DateTime<Utc>) -> Option<Task> {
    let task = tasks.iter_mut().find(|task| task.id == id)?;

    if let Some(title) = patch.title {
        let title = title.trim();
        if !title.is_empty() {
            task.title = title.to_string();
        }
    }
    if let Some(description) = patch.description {
        let description = description.trim();
        task.description = if description.is_empty() {
            None
        } else {
            Some(description.to_string())
        };
    }
    if let Some(estimated) = patch.estimated_pomodoros {
        task.estimated_pomodoros = estimated.max(1);
    }
    if let Some(completed) = patch.completed_pomodoros {
        task.completed_pomodoros = completed;
    }
    if let Some(is_completed) = patch.is_completed {
        // completed_at tracks is_completed, regardless of what the patch says.
        task.is_completed = is_completed;
        task.completed_at = if is_completed { Some(now) } else { None };
    }

    Some(task.clone())
}

/// Marks the listed tasks completed. The completion timestamp is backfilled
/// only when missing, so re-applying the same ids is a no-op.
pub fn complete_many(tasks: &mut [Task], ids: &[String], now: DateTime<Utc>) -> usize {
    let mut changed = 0;
    for task in tasks
        .iter_mut()
        .filter(|task| ids.iter().any(|id| id == &task.id))
    {
        if !task.is_completed || task.completed_at.is_none() {
            task.is_completed = true;
            if task.completed_at.is_none() {
                task.completed_at = Some(now);
            }
            changed += 1;
        }
    }
    changed
}

/// Removes the listed tasks; absent ids are ignored.
pub fn delete_many(tasks: &mut Vec<Task>, ids: &[String]) -> usize {
    let before = tasks.len();
    tasks.retain(|task| !ids.iter().any(|id| id == &task.id));
    before - tasks.len()
}

/// Bumps the completed pomodoro count. Never flips `is_completed`; finishing
/// a task is always an explicit action.
pub fn increment_pomodoro(tasks: &mut [Task], id: &str) -> Option<Task> {
    let task = tasks.iter_mut().find(|task| task.id == id)?;
    task.completed_pomodoros = task.completed_pomodoros.saturating_add(1);
    Some(task.clone())
}

pub fn clear_completed(tasks: &mut Vec<Task>) -> usize {
    let before = tasks.len();
    tasks.retain(|task| !task.is_completed);
    before - tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn seeded(count: usize) -> Vec<Task> {
        let mut tasks = Vec::new();
        for index in 0..count {
            create(
                &mut tasks,
                format!("tsk-{index}"),
                &format!("Task {index}"),
                None,
                None,
                fixed_time("2026-03-02T08:00:00Z"),
            );
        }
        tasks
    }

    #[test]
    fn create_applies_defaults_and_trims() {
        let mut tasks = Vec::new();
        let task = create(
            &mut tasks,
            "tsk-1".to_string(),
            "  Ship release  ",
            Some("   ".to_string()),
            Some(0),
            fixed_time("2026-03-02T08:00:00Z"),
        );

        assert_eq!(task.title, "Ship release");
        assert_eq!(task.description, None);
        assert_eq!(task.estimated_pomodoros, 1);
        assert_eq!(task.completed_pomodoros, 0);
        assert!(!task.is_completed);
        assert!(task.validate().is_ok());
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn update_derives_completed_at_and_ignores_explicit_value() {
        let mut tasks = seeded(1);
        let now = fixed_time("2026-03-02T10:00:00Z");
        let patch = TaskPatch {
            is_completed: Some(true),
            completed_at: Some(fixed_time("1999-01-01T00:00:00Z")),
            ..TaskPatch::default()
        };

        let updated = update(&mut tasks, "tsk-0", patch, now).expect("task exists");
        assert!(updated.is_completed);
        assert_eq!(updated.completed_at, Some(now));

        let reopened = update(
            &mut tasks,
            "tsk-0",
            TaskPatch {
                is_completed: Some(false),
                ..TaskPatch::default()
            },
            fixed_time("2026-03-02T11:00:00Z"),
        )
        .expect("task exists");
        assert!(!reopened.is_completed);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn update_missing_task_returns_none() {
        let mut tasks = seeded(1);
        assert!(update(&mut tasks, "missing", TaskPatch::default(), fixed_time("2026-03-02T10:00:00Z")).is_none());
    }

    #[test]
    fn complete_many_is_idempotent_on_timestamp() {
        let mut tasks = seeded(2);
        let first = fixed_time("2026-03-02T10:00:00Z");
        let second = fixed_time("2026-03-02T12:00:00Z");
        let ids = vec!["tsk-0".to_string()];

        assert_eq!(complete_many(&mut tasks, &ids, first), 1);
        assert_eq!(complete_many(&mut tasks, &ids, second), 0);
        assert_eq!(tasks[0].completed_at, Some(first));
        assert!(!tasks[1].is_completed);
    }

    #[test]
    fn delete_many_ignores_absent_ids() {
        let mut tasks = seeded(3);
        let removed = delete_many(
            &mut tasks,
            &["tsk-1".to_string(), "missing".to_string()],
        );
        assert_eq!(removed, 1);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|task| task.id != "tsk-1"));
    }

    #[test]
    fn increment_pomodoro_never_completes_the_task() {
        let mut tasks = seeded(1);
        for _ in 0..3 {
            increment_pomodoro(&mut tasks, "tsk-0").expect("task exists");
        }
        // estimated is 1, completed is now 3, and the task is still open
        assert_eq!(tasks[0].completed_pomodoros, 3);
        assert!(!tasks[0].is_completed);
        assert_eq!(tasks[0].completed_at, None);
    }

    #[test]
    fn clear_completed_removes_only_completed_tasks() {
        let mut tasks = seeded(3);
        complete_many(
            &mut tasks,
            &["tsk-0".to_string(), "tsk-2".to_string()],
            fixed_time("2026-03-02T10:00:00Z"),
        );

        assert_eq!(clear_completed(&mut tasks), 2);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "tsk-1");
    }

    #[test]
    fn normalized_title_collapses_case_and_whitespace() {
        assert_eq!(normalized_title("  Build API "), "build api");
        assert_eq!(normalized_title("BUILD API"), "build api");
    }
}
