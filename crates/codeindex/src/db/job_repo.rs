//! Job repository: CRUD operations for the `processing_jobs` table.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now, Database, DatabaseError};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a start attempt has finished with this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A job row from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRow {
    pub id: i64,
    pub project_id: Option<i64>,
    pub module_id: Option<i64>,
    pub directory: String,
    pub status: JobStatus,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_functions: u64,
    pub processed_functions: u64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            module_id: row.get("module_id")?,
            directory: row.get("directory")?,
            status: row.get("status")?,
            total_files: row.get("total_files")?,
            processed_files: row.get("processed_files")?,
            total_functions: row.get("total_functions")?,
            processed_functions: row.get("processed_functions")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields for a new job. Jobs always start out `pending`.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub directory: String,
    pub project_id: Option<i64>,
    pub module_id: Option<i64>,
}

/// Inserts a new pending job and returns its id.
pub fn insert(db: &Database, job: &NewJob) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let ts = now();
        conn.execute(
            "INSERT INTO processing_jobs (project_id, module_id, directory, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![job.project_id, job.module_id, job.directory, JobStatus::Pending, ts],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM processing_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists all jobs, newest first.
pub fn list(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM processing_jobs ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs whose status is one of `statuses`, oldest first.
pub fn list_by_status(db: &Database, statuses: &[JobStatus]) -> Result<Vec<JobRow>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM processing_jobs WHERE status IN ({}) ORDER BY id",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(statuses.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a job to `running` and clears any error left by a previous attempt.
pub fn mark_running(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_jobs SET status = ?2, error_message = NULL, updated_at = ?3 WHERE id = ?1",
            params![id, JobStatus::Running, now()],
        )?;
        ensure_changed(changed, id)
    })
}

/// Records the totals discovered by enumeration.
pub fn set_totals(
    db: &Database,
    id: i64,
    total_files: u64,
    total_functions: u64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_jobs SET total_files = ?2, total_functions = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, total_files as i64, total_functions as i64, now()],
        )?;
        ensure_changed(changed, id)
    })
}

/// Marks a job completed.
pub fn mark_completed(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, JobStatus::Completed, now()],
        )?;
        ensure_changed(changed, id)
    })
}

/// Marks a job failed with the captured error message.
pub fn mark_failed(db: &Database, id: i64, error_message: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processing_jobs SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, JobStatus::Failed, error_message, now()],
        )?;
        ensure_changed(changed, id)
    })
}

fn ensure_changed(changed: usize, id: i64) -> Result<(), DatabaseError> {
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "job",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn new_job(directory: &str) -> NewJob {
        NewJob {
            directory: directory.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, &new_job("/src")).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.directory, "/src");
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.total_files, 0);
        assert_eq!(found.processed_functions, 0);
        assert!(found.error_message.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 42).unwrap().is_none());
    }

    #[test]
    fn test_status_transitions() {
        let db = test_db();
        let id = insert(&db, &new_job("/src")).unwrap();

        mark_failed(&db, id, "boom").unwrap();
        let failed = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        mark_running(&db, id).unwrap();
        let running = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.error_message.is_none());

        mark_completed(&db, id).unwrap();
        assert_eq!(
            find_by_id(&db, id).unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[test]
    fn test_updates_on_missing_job_fail() {
        let db = test_db();
        assert!(matches!(
            mark_running(&db, 7),
            Err(DatabaseError::NotFound { entity: "job", .. })
        ));
        assert!(set_totals(&db, 7, 1, 1).is_err());
    }

    #[test]
    fn test_set_totals() {
        let db = test_db();
        let id = insert(&db, &new_job("/src")).unwrap();
        set_totals(&db, id, 2, 3).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!((found.total_files, found.total_functions), (2, 3));
    }

    #[test]
    fn test_list_by_status() {
        let db = test_db();
        let pending = insert(&db, &new_job("/a")).unwrap();
        let running = insert(&db, &new_job("/b")).unwrap();
        let done = insert(&db, &new_job("/c")).unwrap();
        mark_running(&db, running).unwrap();
        mark_completed(&db, done).unwrap();

        let open = list_by_status(&db, &[JobStatus::Pending, JobStatus::Running]).unwrap();
        let ids: Vec<i64> = open.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![pending, running]);

        assert!(list_by_status(&db, &[]).unwrap().is_empty());
        assert_eq!(list(&db).unwrap().len(), 3);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("processing".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
