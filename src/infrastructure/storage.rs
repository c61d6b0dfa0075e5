use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS alarms (
        name TEXT PRIMARY KEY,
        fire_at_ms INTEGER NOT NULL,
        period_minutes INTEGER
    );
";

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Durable get/set of opaque JSON values, keyed by name. Values survive
/// process restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError>;
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("kv lock poisoned: {error}")))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("kv lock poisoned: {error}")))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    fn temp_db_path() -> PathBuf {
        let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "pomotrack-storage-tests-{}-{}.sqlite",
            std::process::id(),
            sequence
        ))
    }

    #[test]
    fn sqlite_store_roundtrips_and_overwrites() {
        let path = temp_db_path();
        initialize_database(&path).expect("initialize database");
        let store = SqliteKeyValueStore::new(&path);

        assert!(store.get("session").expect("get").is_none());

        store
            .set("session", &serde_json::json!({"time_left": 1500}))
            .expect("set");
        let value = store.get("session").expect("get").expect("value exists");
        assert_eq!(value["time_left"], 1500);

        store
            .set("session", &serde_json::json!({"time_left": 30}))
            .expect("overwrite");
        let value = store.get("session").expect("get").expect("value exists");
        assert_eq!(value["time_left"], 30);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let path = temp_db_path();
        initialize_database(&path).expect("initialize database");
        {
            let store = SqliteKeyValueStore::new(&path);
            store
                .set("tasks", &serde_json::json!([{"id": "tsk-1"}]))
                .expect("set");
        }

        let reopened = SqliteKeyValueStore::new(&path);
        let value = reopened.get("tasks").expect("get").expect("value exists");
        assert!(value.is_array());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn in_memory_store_roundtrips() {
        let store = InMemoryKeyValueStore::default();
        store
            .set("ui_preferences", &serde_json::json!({"theme": "dark"}))
            .expect("set");
        let value = store
            .get("ui_preferences")
            .expect("get")
            .expect("value exists");
        assert_eq!(value["theme"], "dark");
    }
}
