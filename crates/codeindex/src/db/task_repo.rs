//! Task repository: the `processing_tasks` table.
//!
//! A task is keyed by `(job_id, file_path, function_name)`; the table
//! carries a unique index on that triple, so creation is idempotent and a
//! resumed job finds exactly the rows its earlier attempt left behind.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now, Database, DatabaseError};

/// State of a single function's embedding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Logical identity of a task within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey<'a> {
    pub job_id: i64,
    pub file_path: &'a str,
    pub function_name: &'a str,
}

/// A task row from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRow {
    pub id: i64,
    pub job_id: i64,
    pub file_path: String,
    pub function_name: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            file_path: row.get("file_path")?,
            function_name: row.get("function_name")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Progress counters derived from the task table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub processed_files: u64,
    pub processed_functions: u64,
}

/// Creates a pending task unless one already exists for the key.
/// Returns `true` when a row was inserted.
pub fn insert_if_absent(db: &Database, key: &TaskKey<'_>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| insert_if_absent_on(conn, key))
}

pub(crate) fn insert_if_absent_on(conn: &Connection, key: &TaskKey<'_>) -> Result<bool, DatabaseError> {
    let ts = now();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO processing_tasks
         (job_id, file_path, function_name, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![key.job_id, key.file_path, key.function_name, TaskStatus::Pending, ts],
    )?;
    Ok(inserted > 0)
}

/// Finds the task for a key.
pub fn find_by_key(db: &Database, key: &TaskKey<'_>) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM processing_tasks
                 WHERE job_id = ?1 AND file_path = ?2 AND function_name = ?3",
                params![key.job_id, key.file_path, key.function_name],
                TaskRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Sets the status of the task for `key`, creating the row if it does not
/// exist yet. A `None` error clears any previous message.
pub fn upsert_status(
    db: &Database,
    key: &TaskKey<'_>,
    status: TaskStatus,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| upsert_status_on(conn, key, status, error_message))
}

pub(crate) fn upsert_status_on(
    conn: &Connection,
    key: &TaskKey<'_>,
    status: TaskStatus,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO processing_tasks
         (job_id, file_path, function_name, status, error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (job_id, file_path, function_name)
         DO UPDATE SET status = excluded.status,
                       error_message = excluded.error_message,
                       updated_at = excluded.updated_at",
        params![
            key.job_id,
            key.file_path,
            key.function_name,
            status,
            error_message,
            ts
        ],
    )?;
    Ok(())
}

/// Lists every task of a job ordered by file and function.
pub fn list_for_job(db: &Database, job_id: i64) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_tasks WHERE job_id = ?1 ORDER BY file_path, function_name",
        )?;
        let rows = stmt
            .query_map(params![job_id], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts the tasks of a job in the given status.
pub fn count_by_status(db: &Database, job_id: i64, status: TaskStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_tasks WHERE job_id = ?1 AND status = ?2",
            params![job_id, status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Marks every task of one file that has not completed as failed. Used when
/// a file can no longer be read or parsed by the time it is processed.
/// Returns the number of tasks changed.
pub fn fail_unfinished_for_file(
    db: &Database,
    job_id: i64,
    file_path: &str,
    error_message: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_tasks SET status = ?3, error_message = ?4, updated_at = ?5
             WHERE job_id = ?1 AND file_path = ?2 AND status != ?6",
            params![
                job_id,
                file_path,
                TaskStatus::Failed,
                error_message,
                now(),
                TaskStatus::Completed
            ],
        )?;
        Ok(changed)
    })
}

/// Deletes every task of a job whose `(file_path, function_name)` is not in
/// `current`, whatever its status. Returns the number of rows removed.
pub fn delete_stale(
    db: &Database,
    job_id: i64,
    current: &HashSet<(&str, &str)>,
) -> Result<usize, DatabaseError> {
    db.with_transaction(|conn| delete_stale_on(conn, job_id, current))
}

pub(crate) fn delete_stale_on(
    conn: &Connection,
    job_id: i64,
    current: &HashSet<(&str, &str)>,
) -> Result<usize, DatabaseError> {
    let stale: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, file_path, function_name FROM processing_tasks WHERE job_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<(i64, String, String)>, _>>()?;
        rows.into_iter()
            .filter(|(_, file, function)| !current.contains(&(file.as_str(), function.as_str())))
            .collect()
    };

    let mut delete = conn.prepare("DELETE FROM processing_tasks WHERE id = ?1")?;
    for (id, file_path, function_name) in &stale {
        log::debug!(
            "Removing stale task {} of job {}: {}::{}",
            id,
            job_id,
            file_path,
            function_name
        );
        delete.execute(params![id])?;
    }
    Ok(stale.len())
}

/// Recomputes a job's progress counters from its task rows and stores them
/// on the job.
///
/// Reads and write happen under one connection lock, so the stored counters
/// always match the task table at the moment of the call. Concurrent callers
/// are last-writer-wins and converge once every unit has finished.
pub fn recompute_progress(db: &Database, job_id: i64) -> Result<JobProgress, DatabaseError> {
    db.with_conn(|conn| {
        let processed_functions: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_tasks WHERE job_id = ?1 AND status != ?2",
            params![job_id, TaskStatus::Pending],
            |r| r.get(0),
        )?;
        let processed_files: u64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT file_path FROM processing_tasks
                WHERE job_id = ?1
                GROUP BY file_path
                HAVING SUM(CASE WHEN status = ?2 THEN 1 ELSE 0 END) = 0
             )",
            params![job_id, TaskStatus::Pending],
            |r| r.get(0),
        )?;

        let changed = conn.execute(
            "UPDATE processing_jobs
             SET processed_files = ?2, processed_functions = ?3, updated_at = ?4
             WHERE id = ?1",
            params![job_id, processed_files as i64, processed_functions as i64, now()],
        )?;
        if changed == 0 {
            log::warn!("Progress for job {} not stored: job row missing", job_id);
        }

        Ok(JobProgress {
            processed_files,
            processed_functions,
        })
    })
}
