//! Code artifact repository: the `code_files` and `code_blocks` tables.
//!
//! File rows are first-write-wins: `path` is unique and creation goes
//! through `INSERT OR IGNORE`, so concurrent units that discover the same
//! file converge on one row. Code blocks are append-only.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now, Database, DatabaseError};

/// A source file known to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeFileRow {
    pub id: i64,
    pub path: String,
    pub module_id: Option<i64>,
    pub created_at: String,
}

impl CodeFileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            path: row.get("path")?,
            module_id: row.get("module_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// One embedded function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlockRow {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub code: String,
    pub start_line: u32,
    pub end_line: u32,
    pub embedding: Vec<f32>,
    pub created_at: String,
}

impl CodeBlockRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let embedding: String = row.get("embedding")?;
        let embedding = serde_json::from_str(&embedding).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get("id")?,
            file_id: row.get("file_id")?,
            name: row.get("name")?,
            code: row.get("code")?,
            start_line: row.get("start_line")?,
            end_line: row.get("end_line")?,
            embedding,
            created_at: row.get("created_at")?,
        })
    }
}

/// Data needed to append a code block.
#[derive(Debug, Clone)]
pub struct NewCodeBlock<'a> {
    pub file_id: i64,
    pub name: &'a str,
    pub code: &'a str,
    pub start_line: u32,
    pub end_line: u32,
    pub embedding: &'a [f32],
}

/// Finds a file row by its path.
pub fn find_file_by_path(db: &Database, path: &str) -> Result<Option<CodeFileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM code_files WHERE path = ?1",
                params![path],
                CodeFileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Inserts a file row and returns its id. Fails if the path already exists.
pub fn create_file(db: &Database, path: &str, module_id: Option<i64>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO code_files (path, module_id, created_at) VALUES (?1, ?2, ?3)",
            params![path, module_id, now()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Returns the id of the file row for `path`, creating it if absent.
pub fn find_or_create_file(
    db: &Database,
    path: &str,
    module_id: Option<i64>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| find_or_create_file_on(conn, path, module_id))
}

pub(crate) fn find_or_create_file_on(
    conn: &Connection,
    path: &str,
    module_id: Option<i64>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO code_files (path, module_id, created_at) VALUES (?1, ?2, ?3)",
        params![path, module_id, now()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM code_files WHERE path = ?1",
        params![path],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// Lists files, optionally restricted to a module.
pub fn list_files(db: &Database, module_id: Option<i64>) -> Result<Vec<CodeFileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM code_files WHERE (?1 IS NULL OR module_id = ?1) ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![module_id], CodeFileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Appends a code block and returns its id.
pub fn insert_block(db: &Database, block: &NewCodeBlock<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_block_on(conn, block))
}

pub(crate) fn insert_block_on(
    conn: &Connection,
    block: &NewCodeBlock<'_>,
) -> Result<i64, DatabaseError> {
    let embedding = serde_json::to_string(block.embedding).map_err(|e| {
        DatabaseError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
    })?;
    conn.execute(
        "INSERT INTO code_blocks (file_id, name, code, start_line, end_line, embedding, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            block.file_id,
            block.name,
            block.code,
            block.start_line,
            block.end_line,
            embedding,
            now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists the code blocks of one file in insertion order.
pub fn list_blocks(db: &Database, file_id: i64) -> Result<Vec<CodeBlockRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM code_blocks WHERE file_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![file_id], CodeBlockRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts all code blocks, or those with the given name when `name` is set.
pub fn count_blocks(db: &Database, name: Option<&str>) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM code_blocks WHERE (?1 IS NULL OR name = ?1)",
            params![name],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_create_and_find_file() {
        let db = test_db();
        let id = create_file(&db, "/src/a.py", None).unwrap();

        let found = find_file_by_path(&db, "/src/a.py").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.module_id, None);
        assert!(find_file_by_path(&db, "/src/b.py").unwrap().is_none());
    }

    #[test]
    fn test_find_or_create_file_first_write_wins() {
        let db = test_db();
        let project = super::super::project_repo::find_or_create_project(&db, "p").unwrap();
        let module = super::super::project_repo::find_or_create_module(&db, project.id, "m").unwrap();

        let first = find_or_create_file(&db, "/src/a.py", Some(module.id)).unwrap();
        let second = find_or_create_file(&db, "/src/a.py", None).unwrap();
        assert_eq!(first, second);

        let row = find_file_by_path(&db, "/src/a.py").unwrap().unwrap();
        assert_eq!(row.module_id, Some(module.id));
        assert_eq!(list_files(&db, None).unwrap().len(), 1);
        assert_eq!(list_files(&db, Some(module.id)).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_and_list_blocks() {
        let db = test_db();
        let file_id = create_file(&db, "/src/a.py", None).unwrap();
        let embedding = vec![0.25_f32, 0.5, 0.75];

        insert_block(
            &db,
            &NewCodeBlock {
                file_id,
                name: "f1",
                code: "def f1():\n    pass",
                start_line: 1,
                end_line: 2,
                embedding: &embedding,
            },
        )
        .unwrap();

        let blocks = list_blocks(&db, file_id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "f1");
        assert_eq!(blocks[0].embedding, embedding);
        assert_eq!((blocks[0].start_line, blocks[0].end_line), (1, 2));
        assert_eq!(count_blocks(&db, Some("f1")).unwrap(), 1);
        assert_eq!(count_blocks(&db, Some("f2")).unwrap(), 0);
        assert_eq!(count_blocks(&db, None).unwrap(), 1);
    }
}
