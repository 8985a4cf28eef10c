use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../../sql/jobs.sql");

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("failed to open job database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on job database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("job store path not configured")]
    MissingStore,
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("job not found: {0}")]
    NotFound(i64),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type JobResult<T> = Result<T, JobStoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(JobStoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// A job to be enqueued. The payload is an arbitrary key/value map of form
/// fields the site flow will consume by key.
#[derive(Debug, Clone, Default)]
pub struct JobDraft {
    pub title: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub title: String,
    pub payload: Map<String, Value>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub result_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload_text: String = row.get("payload")?;
        let payload = match serde_json::from_str::<Value>(&payload_text) {
            Ok(Value::Object(map)) => map,
            _ => {
                let id: i64 = row.get("id")?;
                tracing::warn!(job_id = id, "job payload is not a JSON object, treating as empty");
                Map::new()
            }
        };
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            payload,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Pending),
            error: row.get("error")?,
            result_path: row.get("result_path")?,
            created_at: parse_timestamp(row.get("created_at")?),
            updated_at: parse_timestamp(row.get("updated_at")?),
        })
    }

    /// Convenience accessor for string payload fields.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct JobStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for JobStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl JobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> JobResult<JobStore> {
        let path = self.path.ok_or(JobStoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(JobStore { path, flags })
    }
}

/// Job persistence. Cheap to clone; every operation opens its own
/// connection, so each worker thread ends up with private connections.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl JobStore {
    pub fn builder() -> JobStoreBuilder {
        JobStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> JobResult<Self> {
        JobStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> JobResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            JobStoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| JobStoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn enqueue(&self, draft: &JobDraft) -> JobResult<i64> {
        let conn = self.open()?;
        let payload = serde_json::to_string(&draft.payload)?;
        conn.execute(
            "INSERT INTO jobs (title, payload, status) VALUES (?1, ?2, 'pending')",
            params![&draft.title, &payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> JobResult<JobRecord> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(JobRecord::from_row(row)?),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    /// Pending jobs in insertion order.
    pub fn fetch_pending(&self, limit: Option<usize>) -> JobResult<Vec<JobRecord>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM jobs WHERE status = 'pending' ORDER BY id ASC");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query([])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(JobRecord::from_row(row)?);
        }
        Ok(jobs)
    }

    /// Pending jobs restricted to an explicit id subset, still in id order.
    pub fn fetch_pending_in(&self, ids: &[i64]) -> JobResult<Vec<JobRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let query = format!(
            "SELECT * FROM jobs WHERE id IN ({placeholders}) AND status = 'pending' ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(ids.iter()))?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(JobRecord::from_row(row)?);
        }
        Ok(jobs)
    }

    pub fn mark_in_progress(&self, id: i64) -> JobResult<()> {
        self.update_status(id, JobStatus::InProgress, None, None)
    }

    pub fn mark_succeeded(&self, id: i64, result_path: &str) -> JobResult<()> {
        self.update_status(id, JobStatus::Succeeded, None, Some(result_path))
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> JobResult<()> {
        self.update_status(id, JobStatus::Failed, Some(error), None)
    }

    fn update_status(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
        result_path: Option<&str>,
    ) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs SET status = ?1, error = ?2,
                    result_path = COALESCE(?3, result_path),
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?4",
            params![status.as_str(), error, result_path, id],
        )?;
        if affected == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn counts(&self) -> JobResult<HashMap<JobStatus, i64>> {
        let conn = self.open()?;
        let mut counts = HashMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(status.parse().unwrap_or(JobStatus::Pending), count);
        }
        Ok(counts)
    }

    pub fn config_get(&self, key: &str) -> JobResult<Option<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT value FROM app_config WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn config_set(&self, key: &str, value: &str) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Dump the job table as a gzipped SQL script.
    pub fn export_backup(&self, output: impl AsRef<Path>) -> JobResult<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.open()?;
        let mut dump = String::new();
        dump.push_str(JOBS_SCHEMA);
        dump.push('\n');
        dump.push_str("BEGIN;\n");

        let mut stmt = conn.prepare(
            "SELECT id, title, payload, status, error, result_path, created_at, updated_at
             FROM jobs ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        for row in rows {
            let (id, title, payload, status, error, result_path, created_at, updated_at) = row?;
            dump.push_str(&format!(
                "INSERT INTO jobs (id, title, payload, status, error, result_path, created_at, updated_at) VALUES ({}, {}, {}, {}, {}, {}, {}, {});\n",
                id,
                sql_quote(&title),
                sql_quote(&payload),
                sql_quote(&status),
                format_optional_text(error),
                format_optional_text(result_path),
                format_optional_text(created_at),
                format_optional_text(updated_at),
            ));
        }

        dump.push_str("COMMIT;\n");

        let file = File::create(output)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(dump.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    /// Online copy of the whole database to another file.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> JobResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| JobStoreError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }
}

fn sql_quote(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    format!("'{}'", escaped)
}

fn format_optional_text(value: Option<String>) -> String {
    value
        .map(|v| sql_quote(&v))
        .unwrap_or_else(|| "NULL".to_string())
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
}
