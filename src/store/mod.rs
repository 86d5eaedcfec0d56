//! Persistent store.
//!
//! A single SQLite file backing six logical tables (tasks, audit, knowledge,
//! cache, habits, experience). Writes are serialized behind one mutex-guarded
//! connection, matching the corpus's single-shared-connection convention;
//! SQLite's own journal gives us crash safety on top of that.

use crate::errors::{Result, StoreError, UmbrasolError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub request: String,
    pub status: TaskStatus,
    pub checkpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Low => "LOW",
            Risk::Medium => "MEDIUM",
            Risk::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceLesson {
    pub tool: String,
    pub action: String,
    pub error: Option<String>,
    pub success: bool,
}

/// Owns the single sqlite connection. Cheap to clone via `Arc<Store>`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    UmbrasolError::Internal(format!("failed to create store dir: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// An in-memory database, used by this crate's own tests and by the
    /// integration tests under `tests/`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                checkpoint TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT NOT NULL,
                result TEXT NOT NULL,
                risk TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS knowledge (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                category TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cache (
                fingerprint TEXT PRIMARY KEY,
                tool TEXT NOT NULL,
                cmd TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS habits (
                context_key TEXT PRIMARY KEY,
                counts TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS experience (
                task_key TEXT PRIMARY KEY,
                lesson TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ---- tasks ----

    pub fn add_task(&self, request: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO tasks (request, status, checkpoint, created_at, updated_at) VALUES (?1, 'pending', NULL, ?2, ?2)",
            params![request, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_task_checkpoint(
        &self,
        id: i64,
        status: TaskStatus,
        checkpoint: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE tasks SET status = ?1, checkpoint = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), checkpoint, now, id],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    pub fn get_pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, request, status, checkpoint, created_at, updated_at FROM tasks \
                 WHERE status != 'completed' AND status != 'failed' \
                 ORDER BY created_at ASC LIMIT ?1",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_task)
            .map_err(StoreError::Sqlite)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(StoreError::Sqlite)?);
        }
        Ok(tasks)
    }

    // ---- audit ----

    pub fn log_action(&self, command: &str, result: &str, risk: Risk) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO audit (command, result, risk, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![command, result, risk.as_str(), now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    /// Total audit row count, used by tests to assert a request logged
    /// exactly the actions it was expected to.
    pub fn audit_count(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM audit", [], |row| row.get(0))
            .map_err(StoreError::Sqlite)
            .map_err(UmbrasolError::from)
    }

    /// Risk tier of the most recently logged audit row, if any.
    pub fn last_audit_risk(&self) -> Result<Option<Risk>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let risk: Option<String> = conn
            .query_row(
                "SELECT risk FROM audit ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(risk.map(|s| match s.as_str() {
            "HIGH" => Risk::High,
            "MEDIUM" => Risk::Medium,
            _ => Risk::Low,
        }))
    }

    // ---- knowledge ----

    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT value FROM knowledge WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::Sqlite)
        .map_err(UmbrasolError::from)
    }

    pub fn save_preference(&self, key: &str, value: &str, category: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO knowledge (key, value, category, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, category = excluded.category, updated_at = excluded.updated_at",
            params![key, value, category, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ---- cache ----

    pub fn get_cache(&self, fingerprint: &str) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT tool, cmd FROM cache WHERE fingerprint = ?1",
            params![fingerprint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(StoreError::Sqlite)
        .map_err(UmbrasolError::from)
    }

    pub fn set_cache(&self, fingerprint: &str, tool: &str, cmd: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO cache (fingerprint, tool, cmd, created_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(fingerprint) DO UPDATE SET tool = excluded.tool, cmd = excluded.cmd, created_at = excluded.created_at",
            params![fingerprint, tool, cmd, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ---- habits ----

    pub fn get_habit(&self, context_key: &str) -> Result<HashMap<String, u64>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let counts_json: Option<String> = conn
            .query_row(
                "SELECT counts FROM habits WHERE context_key = ?1",
                params![context_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        match counts_json {
            Some(s) => serde_json::from_str(&s).map_err(|e| StoreError::Serde(e).into()),
            None => Ok(HashMap::new()),
        }
    }

    pub fn save_habit(&self, context_key: &str, counts: &HashMap<String, u64>) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        let counts_json = serde_json::to_string(counts).map_err(StoreError::Serde)?;
        conn.execute(
            "INSERT INTO habits (context_key, counts, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(context_key) DO UPDATE SET counts = excluded.counts, updated_at = excluded.updated_at",
            params![context_key, counts_json, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    /// Convenience used by the orchestrator's learning step: bump one
    /// command's count for a context in a single read-modify-write.
    pub fn record_habit(&self, context_key: &str, command: &str) -> Result<()> {
        let mut counts = self.get_habit(context_key)?;
        *counts.entry(command.to_string()).or_insert(0) += 1;
        self.save_habit(context_key, &counts)
    }

    // ---- experience ----

    pub fn get_experience(&self, task_key: &str) -> Result<Option<ExperienceLesson>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let lesson_json: Option<String> = conn
            .query_row(
                "SELECT lesson FROM experience WHERE task_key = ?1",
                params![task_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        match lesson_json {
            Some(s) => {
                let lesson = serde_json::from_str(&s).map_err(StoreError::Serde)?;
                Ok(Some(lesson))
            }
            None => Ok(None),
        }
    }

    pub fn save_experience(&self, task_key: &str, lesson: &ExperienceLesson) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = Utc::now().to_rfc3339();
        let lesson_json = serde_json::to_string(lesson).map_err(StoreError::Serde)?;
        conn.execute(
            "INSERT INTO experience (task_key, lesson, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(task_key) DO UPDATE SET lesson = excluded.lesson, updated_at = excluded.updated_at",
            params![task_key, lesson_json, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        request: row.get(1)?,
        status: TaskStatus::parse(&row.get::<_, String>(2)?),
        checkpoint: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!("failed to parse task created_at: {e}");
                Utc::now()
            }),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!("failed to parse task updated_at: {e}");
                Utc::now()
            }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_task_and_get_pending() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_task("list files").unwrap();
        let pending = store.get_pending_tasks(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].status, TaskStatus::Pending);
    }

    #[test]
    fn completed_task_not_pending() {
        let store = Store::open_in_memory().unwrap();
        let id = store.add_task("list files").unwrap();
        store
            .update_task_checkpoint(id, TaskStatus::Completed, "{}")
            .unwrap();
        let pending = store.get_pending_tasks(10).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn audit_count_and_last_risk() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.audit_count().unwrap(), 0);
        assert_eq!(store.last_audit_risk().unwrap(), None);
        store.log_action("ls,.", "a.txt", Risk::Low).unwrap();
        store.log_action("shell,rm -rf /tmp", "", Risk::High).unwrap();
        assert_eq!(store.audit_count().unwrap(), 2);
        assert_eq!(store.last_audit_risk().unwrap(), Some(Risk::High));
    }

    #[test]
    fn cache_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.set_cache("fp1", "ls", ".").unwrap();
        let hit = store.get_cache("fp1").unwrap();
        assert_eq!(hit, Some(("ls".to_string(), ".".to_string())));
        assert_eq!(store.get_cache("missing").unwrap(), None);
    }

    #[test]
    fn habit_roundtrip_increments() {
        let store = Store::open_in_memory().unwrap();
        store.record_habit("Morning|terminal", "ls").unwrap();
        store.record_habit("Morning|terminal", "ls").unwrap();
        let counts = store.get_habit("Morning|terminal").unwrap();
        assert_eq!(counts.get("ls"), Some(&2));
    }

    #[test]
    fn experience_success_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let lesson = ExperienceLesson {
            tool: "ls".to_string(),
            action: ".".to_string(),
            error: None,
            success: true,
        };
        store.save_experience("list files", &lesson).unwrap();
        let got = store.get_experience("list files").unwrap().unwrap();
        assert!(got.success);
        assert!(got.error.is_none());
    }

    #[test]
    fn preference_upsert() {
        let store = Store::open_in_memory().unwrap();
        store.save_preference("voice", "on", "settings").unwrap();
        store.save_preference("voice", "off", "settings").unwrap();
        assert_eq!(store.get_preference("voice").unwrap(), Some("off".to_string()));
    }

    #[test]
    fn audit_log_does_not_error() {
        let store = Store::open_in_memory().unwrap();
        store.log_action("ls .", "ok", Risk::Low).unwrap();
    }
}
