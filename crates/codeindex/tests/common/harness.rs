//! Test harness for isolated engine runs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use codeindex::db::code_repo;
use codeindex::db::job_repo::{self, JobRow};
use codeindex::db::task_repo::{self, TaskKey, TaskRow, TaskStatus};
use codeindex::{Database, Embedder, JobEngine, WorkerPool};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the source tree a job indexes.
    pub source_dir: PathBuf,
    /// Database file, reopened to simulate a process restart.
    pub db_path: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_dir = temp_dir.path().join("src");
        std::fs::create_dir_all(&source_dir).expect("Failed to create source directory");
        let db_path = temp_dir.path().join("data").join("codeindex.db");
        let db = Database::open(&db_path).expect("Failed to open database");

        Self {
            temp_dir,
            source_dir,
            db_path,
            db,
        }
    }

    /// The two-file tree used by most scenarios: `a.py` with `f1, f2` and
    /// `b.py` with `g1`.
    pub fn with_sample_tree() -> Self {
        let harness = Self::new();
        harness.write(
            "a.py",
            "def f1():\n    return 1\n\n\ndef f2():\n    return 2\n",
        );
        harness.write("b.py", "def g1(x):\n    return x * 2\n");
        harness
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.source_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write source file");
        path
    }

    /// Absolute path string of a source file, as stored on task rows.
    pub fn file_path(&self, relative: &str) -> String {
        self.source_dir.join(relative).to_string_lossy().into_owned()
    }

    pub fn engine(&self, embedder: Arc<dyn Embedder>) -> JobEngine {
        JobEngine::new(self.db.clone(), embedder, Arc::new(WorkerPool::new(4)))
    }

    /// An engine over a freshly opened connection to the same database file.
    pub fn restarted_engine(&self, embedder: Arc<dyn Embedder>) -> JobEngine {
        let db = Database::open(&self.db_path).expect("Failed to reopen database");
        JobEngine::new(db, embedder, Arc::new(WorkerPool::new(4)))
    }

    pub fn create_job(&self, engine: &JobEngine) -> i64 {
        engine
            .create_job(&self.source_dir, None, None)
            .expect("Failed to create job")
    }

    pub fn job(&self, job_id: i64) -> JobRow {
        job_repo::find_by_id(&self.db, job_id)
            .expect("Failed to load job")
            .expect("Job missing")
    }

    pub fn tasks(&self, job_id: i64) -> Vec<TaskRow> {
        task_repo::list_for_job(&self.db, job_id).expect("Failed to list tasks")
    }

    pub fn task(&self, job_id: i64, relative: &str, function: &str) -> TaskRow {
        let file_path = self.file_path(relative);
        task_repo::find_by_key(
            &self.db,
            &TaskKey {
                job_id,
                file_path: &file_path,
                function_name: function,
            },
        )
        .expect("Failed to load task")
        .expect("Task missing")
    }

    pub fn count_tasks(&self, job_id: i64, status: TaskStatus) -> u64 {
        task_repo::count_by_status(&self.db, job_id, status).expect("Failed to count tasks")
    }

    pub fn block_count(&self) -> u64 {
        code_repo::count_blocks(&self.db, None).expect("Failed to count blocks")
    }

    pub fn blocks_named(&self, name: &str) -> u64 {
        code_repo::count_blocks(&self.db, Some(name)).expect("Failed to count blocks")
    }

    pub fn file_count(&self) -> usize {
        code_repo::list_files(&self.db, None)
            .expect("Failed to list files")
            .len()
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}
