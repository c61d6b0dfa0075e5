pub mod error;
pub mod idle;
pub mod jira_client;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod storage;
