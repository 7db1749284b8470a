//! streamrec-storage: SQLite-based persistence for the recording scheduler.
//!
//! Stores schedule rules, the engine's run state and a monotonically
//! increasing revision counter that changes with every rule mutation.
//! Scheduling policy and field validation live in `streamrec-scheduler`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use streamrec_types::{EngineRunState, Recurrence, ScheduleRule, TimeOfDay};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        kind TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        recurrence TEXT NOT NULL,
        created TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS engine_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        state TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    INSERT OR IGNORE INTO meta (key, value) VALUES ('revision', 0);";

const SELECT_RULE: &str =
    "SELECT id, title, enabled, start_time, end_time, recurrence, created FROM schedules";

/// SQLite-based storage for schedule rules and engine state.
#[derive(Clone)]
pub struct RecStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RecStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut *conn)
        })
        .await?
    }

    // ─── Schedule Rules ─────────────────────────────────────

    /// List all rules, oldest first.
    pub async fn list_rules(&self) -> Result<Vec<ScheduleRule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_RULE} ORDER BY created, id"))?;
            let rules = stmt
                .query_map([], rule_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rules)
        })
        .await
    }

    /// Get a rule by ID.
    pub async fn get_rule(&self, id: &str) -> Result<Option<ScheduleRule>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let rule = conn
                .query_row(
                    &format!("{SELECT_RULE} WHERE id = ?1"),
                    rusqlite::params![id],
                    rule_from_row,
                )
                .optional()?;
            Ok(rule)
        })
        .await
    }

    /// Insert a new rule. Fails if the ID already exists.
    pub async fn insert_rule(&self, rule: &ScheduleRule) -> Result<u64> {
        let rule = rule.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO schedules (id, title, enabled, kind, start_time, end_time, recurrence, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    rule.id,
                    rule.title,
                    rule.enabled as i32,
                    rule.kind().as_str(),
                    rule.start_time.to_string(),
                    rule.end_time.to_string(),
                    serde_json::to_string(&rule.recurrence)?,
                    rule.created.to_rfc3339(),
                ],
            )?;
            let revision = bump(&tx)?;
            tx.commit()?;
            Ok(revision)
        })
        .await
    }

    /// Replace every mutable field of an existing rule. `id`, `kind` and
    /// `created` are left untouched. Returns `None` if no such rule exists.
    pub async fn replace_rule(&self, rule: &ScheduleRule) -> Result<Option<u64>> {
        let rule = rule.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE schedules
                 SET title = ?2, enabled = ?3, start_time = ?4, end_time = ?5, recurrence = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    rule.id,
                    rule.title,
                    rule.enabled as i32,
                    rule.start_time.to_string(),
                    rule.end_time.to_string(),
                    serde_json::to_string(&rule.recurrence)?,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let revision = bump(&tx)?;
            tx.commit()?;
            Ok(Some(revision))
        })
        .await
    }

    /// Set the enabled flag. Returns `true` if the stored value changed.
    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE schedules SET enabled = ?2 WHERE id = ?1 AND enabled != ?2",
                rusqlite::params![id, enabled as i32],
            )?;
            if changed > 0 {
                bump(&tx)?;
            }
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    /// Delete a rule. Returns `false` if it did not exist.
    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = tx.execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])?;
            if count > 0 {
                bump(&tx)?;
            }
            tx.commit()?;
            Ok(count > 0)
        })
        .await
    }

    // ─── Revision ───────────────────────────────────────────

    /// Current revision counter.
    pub async fn revision(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let value: i64 =
                conn.query_row("SELECT value FROM meta WHERE key = 'revision'", [], |row| {
                    row.get(0)
                })?;
            Ok(value as u64)
        })
        .await
    }

    /// Increment the revision counter and return the new value.
    pub async fn bump_revision(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let revision = bump(&tx)?;
            tx.commit()?;
            Ok(revision)
        })
        .await
    }

    // ─── Engine Run State ───────────────────────────────────

    /// Load the persisted run state, or the default if none was saved yet.
    pub async fn load_run_state(&self) -> Result<EngineRunState> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT state FROM engine_state WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            match raw {
                Some(json) => Ok(serde_json::from_str(&json)?),
                None => Ok(EngineRunState::default()),
            }
        })
        .await
    }

    /// Save the run state, replacing the previous one.
    pub async fn save_run_state(&self, state: &EngineRunState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO engine_state (id, state, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                rusqlite::params![json, now],
            )?;
            Ok(())
        })
        .await
    }
}

fn bump(conn: &Connection) -> rusqlite::Result<u64> {
    let value: i64 = conn.query_row(
        "UPDATE meta SET value = value + 1 WHERE key = 'revision' RETURNING value",
        [],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRule> {
    let start_time: TimeOfDay = row
        .get::<_, String>(3)?
        .parse()
        .map_err(|e| conversion_error(3, e))?;
    let end_time: TimeOfDay = row
        .get::<_, String>(4)?
        .parse()
        .map_err(|e| conversion_error(4, e))?;
    let recurrence: Recurrence =
        serde_json::from_str(&row.get::<_, String>(5)?).map_err(|e| conversion_error(5, e))?;
    let created = DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
        .map_err(|e| conversion_error(6, e))?
        .with_timezone(&Utc);

    Ok(ScheduleRule {
        id: row.get(0)?,
        title: row.get(1)?,
        enabled: row.get::<_, i32>(2)? != 0,
        start_time,
        end_time,
        recurrence,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::BTreeSet;

    fn rule(id: &str, recurrence: Recurrence) -> ScheduleRule {
        ScheduleRule {
            id: id.into(),
            title: format!("rule {id}"),
            enabled: true,
            start_time: "10:00".parse().unwrap(),
            end_time: "11:00".parse().unwrap(),
            recurrence,
            created: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_rule() {
        let storage = RecStorage::open_in_memory().unwrap();
        let r = rule(
            "a",
            Recurrence::Once {
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            },
        );
        storage.insert_rule(&r).await.unwrap();

        let loaded = storage.get_rule("a").await.unwrap().unwrap();
        assert_eq!(loaded, r);
    }

    #[tokio::test]
    async fn test_get_rule_not_found() {
        let storage = RecStorage::open_in_memory().unwrap();
        assert!(storage.get_rule("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let storage = RecStorage::open_in_memory().unwrap();
        storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();
        assert!(storage.insert_rule(&rule("a", Recurrence::Daily)).await.is_err());
        assert_eq!(storage.list_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_rules_ordered_by_created() {
        let storage = RecStorage::open_in_memory().unwrap();
        let mut late = rule("a", Recurrence::Daily);
        late.created = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();
        storage.insert_rule(&late).await.unwrap();
        storage
            .insert_rule(&rule(
                "b",
                Recurrence::Weekly {
                    weekdays: BTreeSet::from([1, 3]),
                },
            ))
            .await
            .unwrap();

        let ids: Vec<_> = storage
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_replace_rule() {
        let storage = RecStorage::open_in_memory().unwrap();
        storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();

        let mut updated = rule("a", Recurrence::Daily);
        updated.title = "renamed".into();
        updated.end_time = "12:30".parse().unwrap();
        assert!(storage.replace_rule(&updated).await.unwrap().is_some());

        let loaded = storage.get_rule("a").await.unwrap().unwrap();
        assert_eq!(loaded.title, "renamed");
        assert_eq!(loaded.end_time.to_string(), "12:30");

        assert!(storage
            .replace_rule(&rule("missing", Recurrence::Daily))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_set_enabled_reports_change() {
        let storage = RecStorage::open_in_memory().unwrap();
        storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();

        assert!(storage.set_rule_enabled("a", false).await.unwrap());
        // Second call is a no-op
        assert!(!storage.set_rule_enabled("a", false).await.unwrap());
        assert!(!storage.get_rule("a").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_delete_rule() {
        let storage = RecStorage::open_in_memory().unwrap();
        storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();
        assert!(storage.delete_rule("a").await.unwrap());
        assert!(!storage.delete_rule("a").await.unwrap());
        assert!(storage.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revision_bumps_on_mutation_only() {
        let storage = RecStorage::open_in_memory().unwrap();
        assert_eq!(storage.revision().await.unwrap(), 0);

        storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();
        assert_eq!(storage.revision().await.unwrap(), 1);

        storage.list_rules().await.unwrap();
        storage.delete_rule("missing").await.unwrap();
        assert_eq!(storage.revision().await.unwrap(), 1);

        storage.set_rule_enabled("a", false).await.unwrap();
        assert_eq!(storage.revision().await.unwrap(), 2);

        assert_eq!(storage.bump_revision().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_state_roundtrip() {
        let storage = RecStorage::open_in_memory().unwrap();
        assert_eq!(
            storage.load_run_state().await.unwrap(),
            EngineRunState::default()
        );

        let state = EngineRunState {
            last_tick: NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(10, 5, 0),
            desired: true,
            last_rule_id: Some("a".into()),
            owns_recording: true,
            last_error: None,
            consecutive_failures: 0,
        };
        storage.save_run_state(&state).await.unwrap();
        storage.save_run_state(&state).await.unwrap();
        assert_eq!(storage.load_run_state().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamrec.db");
        {
            let storage = RecStorage::open(&path).unwrap();
            storage.insert_rule(&rule("a", Recurrence::Daily)).await.unwrap();
            storage
                .save_run_state(&EngineRunState {
                    owns_recording: true,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let storage = RecStorage::open(&path).unwrap();
        assert_eq!(storage.list_rules().await.unwrap().len(), 1);
        assert_eq!(storage.revision().await.unwrap(), 1);
        assert!(storage.load_run_state().await.unwrap().owns_recording);
    }
}
