use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

const LOG_FILE: &str = "events.log";

/// Append-only JSON-lines log. Logging never fails the caller; a broken log
/// file only drops the line.
#[derive(Debug)]
pub struct EventLog {
    logs_dir: Option<PathBuf>,
    guard: Mutex<()>,
}

impl EventLog {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self {
            logs_dir: Some(logs_dir),
            guard: Mutex::new(()),
        }
    }

    /// Log that discards everything; used by unit tests.
    pub fn disabled() -> Self {
        Self {
            logs_dir: None,
            guard: Mutex::new(()),
        }
    }

    pub fn info(&self, scope: &str, message: &str) {
        self.append("info", scope, message);
    }

    pub fn error(&self, scope: &str, message: &str) {
        self.append("error", scope, message);
    }

    fn append(&self, level: &str, scope: &str, message: &str) {
        let Some(logs_dir) = self.logs_dir.as_ref() else {
            return;
        };
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let path = logs_dir.join(LOG_FILE);
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "scope": scope,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}
