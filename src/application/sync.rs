use crate::application::task_store::TaskStore;
use crate::domain::models::JiraSettings;
use crate::domain::tasks::normalized_title;
use crate::infrastructure::error::{InfraError, SyncError};
use crate::infrastructure::jira_client::{capability_check, JiraClient, JiraIssue};
use crate::infrastructure::logging::EventLog;
use crate::infrastructure::scheduler::{AlarmSchedule, AlarmScheduler};
use crate::infrastructure::storage::KeyValueStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Alarm identity for the recurring import. Must never be shared with the
/// session countdown alarm.
pub const SYNC_ALARM: &str = "jira-auto-sync";

pub const MIN_SYNC_INTERVAL_MINUTES: u32 = 5;
pub const MAX_SYNC_INTERVAL_MINUTES: u32 = 720;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub imported: usize,
    pub fetched: usize,
    pub mapping_errors: usize,
}

/// Pulls external issues into the task list on demand and on a recurring
/// alarm. Fetching and importing are split so callers can run the network
/// round-trip without holding the task list.
pub struct SyncOrchestrator<J, S>
where
    J: JiraClient,
    S: AlarmScheduler,
{
    client: Arc<J>,
    scheduler: Arc<S>,
    log: Arc<EventLog>,
}

impl<J, S> SyncOrchestrator<J, S>
where
    J: JiraClient,
    S: AlarmScheduler,
{
    pub fn new(client: Arc<J>, scheduler: Arc<S>, log: Arc<EventLog>) -> Self {
        Self {
            client,
            scheduler,
            log,
        }
    }

    /// Reconfigures the recurring sync alarm. Always clears the previous
    /// registration first so the call is idempotent; registers again only
    /// when sync is enabled, credentials are complete, and the endpoint
    /// passes the capability check. Returns whether an alarm is registered.
    pub fn configure_alarm(&self, settings: &JiraSettings) -> Result<bool, InfraError> {
        self.scheduler.clear(SYNC_ALARM)?;

        if !settings.auto_sync || !settings.has_credentials() {
            return Ok(false);
        }
        if let Err(error) = capability_check(&settings.base_url) {
            self.log
                .info("sync.configure", &format!("sync alarm not registered: {error}"));
            return Ok(false);
        }

        let minutes = settings
            .sync_interval_minutes
            .clamp(MIN_SYNC_INTERVAL_MINUTES, MAX_SYNC_INTERVAL_MINUTES);
        self.scheduler
            .create(SYNC_ALARM, AlarmSchedule::Every { minutes })?;
        Ok(true)
    }

    /// Fetches importable issues. Configuration problems fail fast; a
    /// retryable failure class is retried exactly once and the second error
    /// propagates unchanged.
    pub async fn fetch_issues(
        &self,
        settings: &JiraSettings,
    ) -> Result<Vec<JiraIssue>, SyncError> {
        if !settings.has_credentials() {
            return Err(SyncError::Configuration(
                "jira base url, email, and api token are required".to_string(),
            ));
        }
        capability_check(&settings.base_url)?;

        match self.client.search_issues(settings).await {
            Ok(issues) => Ok(issues),
            Err(error) if error.is_retryable() => {
                self.log
                    .info("sync.fetch", &format!("retrying after {error}"));
                self.client.search_issues(settings).await
            }
            Err(error) => Err(error),
        }
    }

    /// Maps fetched issues to task candidates and imports the ones whose
    /// title is new. The dedup set starts from the existing task titles and
    /// grows as imports are accepted, so within-batch duplicates collapse.
    pub fn import_issues<K: KeyValueStore>(
        issues: &[JiraIssue],
        tasks: &mut TaskStore<K>,
    ) -> SyncOutcome {
        let mut seen: HashSet<String> = tasks
            .list()
            .iter()
            .map(|task| normalized_title(&task.title))
            .collect();

        let mut outcome = SyncOutcome {
            fetched: issues.len(),
            ..SyncOutcome::default()
        };
        for issue in issues {
            let Some(title) = issue_title(issue) else {
                outcome.mapping_errors += 1;
                continue;
            };
            if seen.insert(normalized_title(&title)) {
                tasks.create_imported(&title);
                outcome.imported += 1;
            }
        }
        outcome
    }

    pub async fn perform_sync<K: KeyValueStore>(
        &self,
        settings: &JiraSettings,
        tasks: &mut TaskStore<K>,
    ) -> Result<SyncOutcome, SyncError> {
        let issues = self.fetch_issues(settings).await?;
        let outcome = Self::import_issues(&issues, tasks);
        self.log.info(
            "sync.import",
            &format!(
                "imported {} of {} fetched issues ({} mapping errors)",
                outcome.imported, outcome.fetched, outcome.mapping_errors
            ),
        );
        Ok(outcome)
    }
}

/// Title for an imported issue: the trimmed summary when present, else the
/// issue key. Issues with neither have no usable identity.
fn issue_title(issue: &JiraIssue) -> Option<String> {
    if let Some(summary) = issue
        .fields
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(summary.to_string());
    }
    issue
        .key
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
