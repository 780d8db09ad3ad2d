//! Project and module repository: CRUD for the `projects` and `modules` tables.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A project row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A module row. Modules group the files a job indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRow {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub created_at: String,
}

impl ModuleRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a project and returns its id. Fails if the name is taken.
pub fn insert_project(db: &Database, name: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("INSERT INTO projects (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a project by name.
pub fn find_project_by_name(db: &Database, name: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM projects WHERE name = ?1",
                params![name],
                ProjectRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns the project with this name, creating it if needed.
pub fn find_or_create_project(db: &Database, name: &str) -> Result<ProjectRow, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO projects (name) VALUES (?1)",
            params![name],
        )?;
        let row = conn.query_row(
            "SELECT * FROM projects WHERE name = ?1",
            params![name],
            ProjectRow::from_row,
        )?;
        Ok(row)
    })
}

/// Lists all projects ordered by id.
pub fn list_projects(db: &Database) -> Result<Vec<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY id")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Inserts a module under a project and returns its id.
pub fn insert_module(db: &Database, project_id: i64, name: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO modules (project_id, name) VALUES (?1, ?2)",
            params![project_id, name],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Returns the module with this name under the project, creating it if needed.
pub fn find_or_create_module(
    db: &Database,
    project_id: i64,
    name: &str,
) -> Result<ModuleRow, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO modules (project_id, name) VALUES (?1, ?2)",
            params![project_id, name],
        )?;
        let row = conn.query_row(
            "SELECT * FROM modules WHERE project_id = ?1 AND name = ?2",
            params![project_id, name],
            ModuleRow::from_row,
        )?;
        Ok(row)
    })
}

/// Lists modules, optionally restricted to one project.
pub fn list_modules(db: &Database, project_id: Option<i64>) -> Result<Vec<ModuleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM modules WHERE (?1 IS NULL OR project_id = ?1) ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![project_id], ModuleRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
