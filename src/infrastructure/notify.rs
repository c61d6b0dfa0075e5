use crate::infrastructure::logging::EventLog;
use std::sync::{Arc, Mutex};

/// Fire-and-forget user notifications. Implementations swallow their own
/// failures; a missed notification must never fail the session transition
/// that triggered it.
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, message: &str);
}

/// Records notifications in the event log. The desktop shell renders them
/// from there; the backend itself stays headless.
#[derive(Debug)]
pub struct EventLogNotifier {
    log: Arc<EventLog>,
}

impl EventLogNotifier {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }
}

impl Notifier for EventLogNotifier {
    fn show(&self, title: &str, message: &str) {
        self.log
            .info("notification", &format!("{title}: {message}"));
    }
}

/// Test notifier capturing everything shown.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().map(|shown| shown.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, title: &str, message: &str) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push((title.to_string(), message.to_string()));
        }
    }
}
