use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AppError, Result};
use crate::store::{ResultStore, RunLogger, RunRecord, RunStatus, StepLogEntry};
use crate::workflow::types::{ArticleRequest, Phase, RunId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    request_json TEXT NOT NULL,
    final_artifact TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS step_logs (
    run_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    phase TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    input_summary TEXT NOT NULL,
    output_summary TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (run_id, sequence)
);
";

/// Idle file connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// How long a writer waits on SQLite's own file lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed run logger and result store.
///
/// Statements run on the blocking pool, each scoped to one run id. A file
/// database hands every statement its own pooled connection, so concurrent
/// runs only ever meet at SQLite's WAL write lock.
pub struct SqliteStore {
    backing: Arc<Backing>,
}

enum Backing {
    File {
        path: PathBuf,
        idle: Mutex<Vec<Connection>>,
    },
    /// A private in-memory database lives and dies with its one connection.
    Memory(Mutex<Connection>),
}

impl Backing {
    fn run<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self {
            Backing::Memory(conn) => {
                let conn = conn.lock().map_err(|e| poisoned(&e))?;
                f(&conn)
            }
            Backing::File { path, idle } => {
                // The pool lock covers checkout and return only, never a statement.
                let pooled = idle.lock().map_err(|e| poisoned(&e))?.pop();
                let conn = match pooled {
                    Some(conn) => conn,
                    None => connect(path)?,
                };
                let result = f(&conn);

                let mut idle = idle.lock().map_err(|e| poisoned(&e))?;
                if idle.len() < MAX_IDLE_CONNECTIONS {
                    idle.push(conn);
                }
                result
            }
        }
    }
}

fn poisoned(e: &dyn std::fmt::Display) -> AppError {
    AppError::Storage(format!("Connection pool lock poisoned: {e}"))
}

fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = connect(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            backing: Arc::new(Backing::File {
                path: path.to_path_buf(),
                idle: Mutex::new(vec![conn]),
            }),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            backing: Arc::new(Backing::Memory(Mutex::new(conn))),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let backing = Arc::clone(&self.backing);
        tokio::task::spawn_blocking(move || backing.run(f))
            .await
            .map_err(|e| AppError::Internal(format!("Storage task failed: {e}")))?
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("Invalid timestamp {value:?}: {e}")))
}

fn parse_run_id(value: &str) -> Result<RunId> {
    RunId::parse(value).ok_or_else(|| AppError::Storage(format!("Invalid run id {value:?}")))
}

#[async_trait]
impl RunLogger for SqliteStore {
    async fn append(&self, entry: &StepLogEntry) -> Result<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let entry = entry.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO step_logs
                    (run_id, sequence, phase, iteration, input_summary, output_summary, metadata_json, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.run_id.to_string(),
                    entry.sequence,
                    entry.phase.as_str(),
                    entry.iteration,
                    entry.input_summary,
                    entry.output_summary,
                    metadata_json,
                    entry.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn entries(&self, run_id: RunId) -> Result<Vec<StepLogEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence, phase, iteration, input_summary, output_summary, metadata_json, timestamp
                 FROM step_logs
                 WHERE run_id = ?1
                 ORDER BY sequence ASC",
            )?;

            let rows = stmt.query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (sequence, phase, iteration, input_summary, output_summary, metadata, ts) = row?;
                entries.push(StepLogEntry {
                    run_id,
                    sequence,
                    phase: phase.parse::<Phase>()?,
                    iteration,
                    input_summary,
                    output_summary,
                    metadata: serde_json::from_str(&metadata)?,
                    timestamp: parse_timestamp(&ts)?,
                });
            }
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn create(&self, run_id: RunId, request: &ArticleRequest) -> Result<()> {
        let request_json = serde_json::to_string(request)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (run_id, request_json, final_artifact, status, created_at, completed_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, NULL)",
                params![
                    run_id.to_string(),
                    request_json,
                    RunStatus::Pending.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn complete(&self, run_id: RunId, final_artifact: &str) -> Result<()> {
        let final_artifact = final_artifact.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE runs SET final_artifact = ?2, status = ?3, completed_at = ?4 WHERE run_id = ?1",
                params![
                    run_id.to_string(),
                    final_artifact,
                    RunStatus::Completed.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            if updated == 0 {
                return Err(AppError::Storage(format!("Unknown run {run_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT run_id, request_json, final_artifact, status, created_at, completed_at
                     FROM runs WHERE run_id = ?1",
                    params![run_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, request_json, final_artifact, status, created_at, completed_at)) = row
            else {
                return Ok(None);
            };

            let status = match status.as_str() {
                "completed" => RunStatus::Completed,
                _ => RunStatus::Pending,
            };

            Ok(Some(RunRecord {
                run_id: parse_run_id(&id)?,
                request: serde_json::from_str(&request_json)?,
                final_artifact,
                status,
                created_at: parse_timestamp(&created_at)?,
                completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ArticleRequest {
        ArticleRequest::new("Explain X", "X", Some(500), Some("casual".into())).unwrap()
    }

    fn entry(run_id: RunId, sequence: u32, phase: Phase, iteration: u32) -> StepLogEntry {
        StepLogEntry {
            run_id,
            sequence,
            phase,
            iteration,
            input_summary: format!("input {sequence}"),
            output_summary: format!("output {sequence}"),
            metadata: serde_json::json!({ "outcome": "ok", "issue_count": 2 }),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_run_record_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = RunId::new();

        store.create(run_id, &request()).await.unwrap();
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.run_id, run_id);
        assert_eq!(record.request, request());
        assert_eq!(record.status, RunStatus::Pending);
        assert!(record.final_artifact.is_none());

        store.complete(run_id, "polished").await.unwrap();
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.final_artifact.as_deref(), Some("polished"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_run() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get(RunId::new()).await.unwrap().is_none());
        assert!(matches!(
            store.complete(RunId::new(), "text").await,
            Err(AppError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = RunId::new();
        store.append(&entry(run_id, 0, Phase::Research, 0)).await.unwrap();
        assert!(store.append(&entry(run_id, 0, Phase::Draft, 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_entries_ordered_and_scoped() {
        let store = SqliteStore::in_memory().unwrap();
        let run_id = RunId::new();
        let other = RunId::new();

        store.append(&entry(run_id, 1, Phase::Draft, 0)).await.unwrap();
        store.append(&entry(other, 0, Phase::Research, 0)).await.unwrap();
        store.append(&entry(run_id, 0, Phase::Research, 0)).await.unwrap();

        let entries = store.entries(run_id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].phase, Phase::Research);
        assert_eq!(entries[1].phase, Phase::Draft);
        assert_eq!(entries[1].metadata["issue_count"], 2);
        assert_eq!(entries[1].input_summary, "input 1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_write_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("runs.db")).unwrap());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let run_id = RunId::new();
                store.create(run_id, &request()).await.unwrap();
                for sequence in 0..5 {
                    store
                        .append(&entry(run_id, sequence, Phase::Draft, sequence))
                        .await
                        .unwrap();
                }
                store.complete(run_id, "done").await.unwrap();
                run_id
            }));
        }

        for handle in handles {
            let run_id = handle.await.unwrap();
            let entries = store.entries(run_id).await.unwrap();
            let sequences: Vec<u32> = entries.iter().map(|e| e.sequence).collect();
            assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
            assert!(entries.iter().all(|e| e.run_id == run_id));
            let record = store.get(run_id).await.unwrap().unwrap();
            assert_eq!(record.status, RunStatus::Completed);
        }

        match store.backing.as_ref() {
            Backing::File { idle, .. } => {
                let idle = idle.lock().unwrap();
                assert!(!idle.is_empty() && idle.len() <= MAX_IDLE_CONNECTIONS);
            }
            Backing::Memory(_) => panic!("expected a file-backed store"),
        }
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.db");
        let run_id = RunId::new();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create(run_id, &request()).await.unwrap();
            store.append(&entry(run_id, 0, Phase::Research, 0)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get(run_id).await.unwrap().is_some());
        assert_eq!(reopened.entries(run_id).await.unwrap().len(), 1);
    }
}
