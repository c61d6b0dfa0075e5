use crate::domain::models::JiraSettings;
use crate::infrastructure::error::SyncError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const REQUEST_TIMEOUT_SECS: u64 = 15;

const SEARCH_JQL: &str =
    "assignee = currentUser() AND resolution = Unresolved ORDER BY updated DESC";
const SEARCH_MAX_RESULTS: &str = "50";
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JiraIssueFields {
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JiraIssue {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub fields: JiraIssueFields,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[async_trait]
pub trait JiraClient: Send + Sync {
    async fn search_issues(&self, settings: &JiraSettings) -> Result<Vec<JiraIssue>, SyncError>;
}

/// Capability gate for the sync target: the endpoint must be an absolute
/// http(s) URL before any request is attempted.
pub fn capability_check(base_url: &str) -> Result<Url, SyncError> {
    let url = Url::parse(base_url.trim())
        .map_err(|error| SyncError::Configuration(format!("invalid jira base url: {error}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SyncError::Configuration(format!(
            "unsupported jira base url scheme: {other}"
        ))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestJiraClient {
    client: Client,
}

impl ReqwestJiraClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn search_endpoint(base_url: &str) -> Result<Url, SyncError> {
        let mut url = capability_check(base_url)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::Configuration("jira base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(["rest", "api", "2", "search"]);
        }
        Ok(url)
    }
}

fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let code = status.as_u16();
    if code == 401 || code == 403 {
        return SyncError::Auth(code);
    }
    let message = if body.trim().is_empty() {
        "jira search request failed".to_string()
    } else {
        response_excerpt(body)
    };
    SyncError::Response {
        status: code,
        message,
    }
}

fn classify_transport(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout(REQUEST_TIMEOUT_SECS)
    } else {
        SyncError::Network(error.to_string())
    }
}

fn response_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > EXCERPT_CHARS {
        trimmed.chars().take(EXCERPT_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl JiraClient for ReqwestJiraClient {
    async fn search_issues(&self, settings: &JiraSettings) -> Result<Vec<JiraIssue>, SyncError> {
        let endpoint = Self::search_endpoint(&settings.base_url)?;

        let response = self
            .client
            .get(endpoint)
            .basic_auth(settings.email.trim(), Some(settings.api_token.trim()))
            .query(&[
                ("jql", SEARCH_JQL),
                ("maxResults", SEARCH_MAX_RESULTS),
                ("fields", "summary"),
            ])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: SearchResponse = serde_json::from_str(&body).map_err(|error| {
            SyncError::Response {
                status: status.as_u16(),
                message: format!("invalid search payload: {error}"),
            }
        })?;
        Ok(parsed.issues)
    }
}
