//! The job engine: enumeration, concurrent per-function processing,
//! progress accounting and resume.
//!
//! The database is the only durable state. A job run can be interrupted at
//! any point; calling [`JobEngine::start`] again (or [`JobEngine::resume_all`]
//! at startup) redoes exactly the work whose task rows are not completed.

mod enumerate;
mod unit;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn, Instrument};

use crate::broadcast::{JobCounters, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
use crate::config::{Config, ScanConfig};
use crate::db::job_repo::{self, JobRow, JobStatus, NewJob};
use crate::db::task_repo::{self, JobProgress, TaskRow};
use crate::db::{project_repo, Database};
use crate::embedding::{self, Embedder};
use crate::error::{CodeIndexError, EngineError};
use crate::extractor::{FunctionExtractor, PythonExtractor};
use crate::worker::WorkerPool;

use unit::{FunctionOutcome, UnitContext};

/// Result of one [`JobEngine::start`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Every discovered function was attempted. Individual functions may
    /// still have failed; see the task rows.
    Completed,
    /// The job could not be enumerated; the message is stored on the job.
    Failed(String),
    /// This engine is already running the job.
    AlreadyRunning,
    NotFound,
}

/// A job with all of its tasks.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: JobRow,
    pub tasks: Vec<TaskRow>,
}

pub struct JobEngine {
    db: Database,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn FunctionExtractor>,
    pool: Arc<WorkerPool>,
    scan: ScanConfig,
    progress: JobProgressBroadcaster,
    running: Arc<Mutex<HashSet<i64>>>,
}

impl JobEngine {
    /// Creates an engine with the Python extractor and default scan rules.
    pub fn new(db: Database, embedder: Arc<dyn Embedder>, pool: Arc<WorkerPool>) -> Self {
        Self {
            db,
            embedder,
            extractor: Arc::new(PythonExtractor::new()),
            pool,
            scan: ScanConfig::default(),
            progress: JobProgressBroadcaster::default(),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Opens the configured database, builds the embedding provider and
    /// starts a worker pool of `config.worker_count` threads.
    pub fn from_config(config: &Config) -> Result<Self, CodeIndexError> {
        let db_path = match &config.database_path {
            Some(path) => path.clone(),
            None => crate::db::default_database_path().ok_or_else(|| {
                crate::error::ConfigError::Validation {
                    message: "no home directory; set database_path".to_string(),
                }
            })?,
        };
        let db = Database::open(&db_path)?;
        let embedder = embedding::build_embedder(&config.embedding)?;
        let pool = Arc::new(WorkerPool::new(config.worker_count));
        Ok(Self::new(db, embedder, pool).with_scan_config(config.scan.clone()))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FunctionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_scan_config(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_broadcaster(mut self, progress: JobProgressBroadcaster) -> Self {
        self.progress = progress;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    /// Inserts a pending job for `directory`. Project and module rows are
    /// created by name when missing; a module requires a project.
    pub fn create_job(
        &self,
        directory: &Path,
        project: Option<&str>,
        module: Option<&str>,
    ) -> Result<i64, EngineError> {
        let (project_id, module_id) = match (project, module) {
            (None, Some(_)) => return Err(EngineError::ModuleWithoutProject),
            (None, None) => (None, None),
            (Some(project), module) => {
                let project = project_repo::find_or_create_project(&self.db, project)?;
                let module_id = match module {
                    Some(name) => Some(project_repo::find_or_create_module(&self.db, project.id, name)?.id),
                    None => None,
                };
                (Some(project.id), module_id)
            }
        };

        let directory = absolute(directory);
        let job_id = job_repo::insert(
            &self.db,
            &NewJob {
                directory: directory.to_string_lossy().into_owned(),
                project_id,
                module_id,
            },
        )?;
        info!(job_id, directory = %directory.display(), "created job");
        Ok(job_id)
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&job_id)
    }

    /// Runs or resumes a job until every discovered function has been
    /// attempted.
    ///
    /// Enumeration failures are recorded on the job and returned as
    /// [`StartOutcome::Failed`]; per-function failures are recorded on
    /// their tasks. An error is returned only when the job cannot be
    /// loaded.
    pub async fn start(&self, job_id: i64) -> Result<StartOutcome, EngineError> {
        let Some(_guard) = RunningGuard::acquire(&self.running, job_id) else {
            info!(job_id, "job already running");
            return Ok(StartOutcome::AlreadyRunning);
        };

        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            warn!(job_id, "job not found");
            return Ok(StartOutcome::NotFound);
        };

        let span = info_span!("job", job_id, directory = %job.directory);
        let tracker = self.progress.start_job(job_id, &job.directory);

        match self.run(&job, &tracker).instrument(span).await {
            Ok(counters) => {
                info!(job_id, "job completed");
                tracker.completed(counters);
                Ok(StartOutcome::Completed)
            }
            Err(e) => {
                let message = e.to_string();
                error!(job_id, error = %message, "job failed");
                if let Err(db_err) = job_repo::mark_failed(&self.db, job_id, &message) {
                    error!(job_id, error = %db_err, "could not record job failure");
                }
                tracker.failed(&message, JobCounters::default());
                Ok(StartOutcome::Failed(message))
            }
        }
    }

    /// Starts every job left pending or running, one after another.
    /// Called once at process startup.
    ///
    /// A job that cannot be loaded is reported as [`StartOutcome::Failed`]
    /// and the remaining jobs are still started. The `Err` case is only a
    /// failure to list the unfinished jobs.
    pub async fn resume_all(&self) -> Result<Vec<(i64, StartOutcome)>, EngineError> {
        let jobs = job_repo::list_by_status(&self.db, &[JobStatus::Pending, JobStatus::Running])?;
        info!(count = jobs.len(), "resuming unfinished jobs");

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let outcome = match self.start(job.id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job_id = job.id, error = %e, "could not resume job");
                    StartOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((job.id, outcome));
        }
        Ok(outcomes)
    }

    pub fn snapshot(&self, job_id: i64) -> Result<JobSnapshot, EngineError> {
        let job = job_repo::find_by_id(&self.db, job_id)?.ok_or(EngineError::JobNotFound(job_id))?;
        let tasks = task_repo::list_for_job(&self.db, job_id)?;
        Ok(JobSnapshot { job, tasks })
    }

    async fn run(&self, job: &JobRow, tracker: &JobProgressTracker) -> Result<JobCounters, EngineError> {
        job_repo::mark_running(&self.db, job.id)?;

        let enumeration = {
            let db = self.db.clone();
            let extractor = Arc::clone(&self.extractor);
            let scan = self.scan.clone();
            let job_id = job.id;
            let root = PathBuf::from(&job.directory);
            self.pool
                .run(move || enumerate::enumerate(&db, extractor.as_ref(), &scan, job_id, &root))
                .await??
        };

        job_repo::set_totals(
            &self.db,
            job.id,
            enumeration.total_files,
            enumeration.total_functions,
        )?;
        let totals = JobCounters {
            total_files: enumeration.total_files,
            total_functions: enumeration.total_functions,
            ..Default::default()
        };
        tracker.enumerated(totals);

        let ctx = UnitContext {
            db: self.db.clone(),
            embedder: Arc::clone(&self.embedder),
            extractor: Arc::clone(&self.extractor),
        };
        let units = enumeration.files.into_iter().map(|path| {
            let span = info_span!("file", path = %path.display());
            self.process_file(&ctx, job, path, tracker, totals)
                .instrument(span)
        });
        join_all(units).await;

        let progress = task_repo::recompute_progress(&self.db, job.id)?;
        job_repo::mark_completed(&self.db, job.id)?;
        Ok(with_progress(totals, progress))
    }

    /// One file unit: re-extracts the file and processes its functions in
    /// order. Never fails; problems are recorded on task rows.
    async fn process_file(
        &self,
        ctx: &UnitContext,
        job: &JobRow,
        path: PathBuf,
        tracker: &JobProgressTracker,
        totals: JobCounters,
    ) {
        let file_path = path.to_string_lossy().into_owned();

        let extractor = Arc::clone(&ctx.extractor);
        let read = self
            .pool
            .run(move || unit::read_functions(extractor.as_ref(), &path))
            .await;
        let functions = match read {
            Ok(Ok(functions)) => functions,
            Ok(Err(e)) => return self.fail_file(job.id, &file_path, &e.to_string(), tracker, totals),
            Err(e) => return self.fail_file(job.id, &file_path, &e.to_string(), tracker, totals),
        };

        for function in functions {
            let unit_ctx = ctx.clone();
            let job_id = job.id;
            let module_id = job.module_id;
            let unit_path = file_path.clone();
            let name = function.qualified_name.clone();

            let result = self
                .pool
                .run(move || {
                    let outcome =
                        unit::process_function(&unit_ctx, job_id, module_id, &unit_path, &function);
                    let progress = task_repo::recompute_progress(&unit_ctx.db, job_id);
                    (outcome, progress)
                })
                .await;

            let (outcome, progress) = match result {
                Ok((Ok(outcome), progress)) => (outcome, progress),
                Ok((Err(db_err), progress)) => {
                    error!(function = %name, error = %db_err, "could not record function result");
                    (FunctionOutcome::Failed(db_err.to_string()), progress)
                }
                Err(worker_err) => {
                    let message = worker_err.to_string();
                    let key = task_repo::TaskKey {
                        job_id,
                        file_path: &file_path,
                        function_name: &name,
                    };
                    if let Err(db_err) = task_repo::upsert_status(
                        &self.db,
                        &key,
                        task_repo::TaskStatus::Failed,
                        Some(&message),
                    ) {
                        error!(function = %name, error = %db_err, "could not record function failure");
                    }
                    (
                        FunctionOutcome::Failed(message),
                        task_repo::recompute_progress(&self.db, job_id),
                    )
                }
            };

            let counters = match progress {
                Ok(progress) => with_progress(totals, progress),
                Err(e) => {
                    warn!(error = %e, "could not recompute progress");
                    totals
                }
            };
            if let FunctionOutcome::Failed(message) = &outcome {
                tracker.function_failed(&file_path, &name, message, counters);
            }
            tracker.progress(counters);
        }
    }

    fn fail_file(
        &self,
        job_id: i64,
        file_path: &str,
        message: &str,
        tracker: &JobProgressTracker,
        totals: JobCounters,
    ) {
        warn!(error = %message, "file could not be re-read");
        if let Err(e) = task_repo::fail_unfinished_for_file(&self.db, job_id, file_path, message) {
            error!(error = %e, "could not record file failure");
        }
        let counters = match task_repo::recompute_progress(&self.db, job_id) {
            Ok(progress) => with_progress(totals, progress),
            Err(_) => totals,
        };
        tracker.progress(counters);
    }
}

fn with_progress(totals: JobCounters, progress: JobProgress) -> JobCounters {
    JobCounters {
        processed_files: progress.processed_files,
        processed_functions: progress.processed_functions,
        ..totals
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Holds a job id in the running set; removes it on drop.
struct RunningGuard {
    running: Arc<Mutex<HashSet<i64>>>,
    job_id: i64,
}

impl RunningGuard {
    fn acquire(running: &Arc<Mutex<HashSet<i64>>>, job_id: i64) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(job_id) {
            return None;
        }
        Some(Self {
            running: Arc::clone(running),
            job_id,
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut set = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;

    fn engine() -> JobEngine {
        JobEngine::new(
            Database::open_in_memory().unwrap(),
            Arc::new(HashedEmbedder::new("hashed-v1".to_string(), 8)),
            Arc::new(WorkerPool::new(1)),
        )
    }

    #[test]
    fn test_running_guard_releases_on_drop() {
        let running = Arc::new(Mutex::new(HashSet::new()));
        let guard = RunningGuard::acquire(&running, 1).unwrap();
        assert!(RunningGuard::acquire(&running, 1).is_none());
        assert!(RunningGuard::acquire(&running, 2).is_some());

        drop(guard);
        assert!(RunningGuard::acquire(&running, 1).is_some());
        assert!(running.lock().unwrap().is_empty());
    }

    #[test]
    fn test_create_job_reuses_project_and_module() {
        let engine = engine();
        let first = engine
            .create_job(Path::new("/src/a"), Some("demo"), Some("core"))
            .unwrap();
        let second = engine
            .create_job(Path::new("/src/b"), Some("demo"), Some("core"))
            .unwrap();

        let a = job_repo::find_by_id(engine.database(), first).unwrap().unwrap();
        let b = job_repo::find_by_id(engine.database(), second).unwrap().unwrap();
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(a.project_id, b.project_id);
        assert_eq!(a.module_id, b.module_id);
        assert_eq!(project_repo::list_projects(engine.database()).unwrap().len(), 1);
    }

    #[test]
    fn test_create_job_without_project() {
        let engine = engine();
        let id = engine.create_job(Path::new("/src"), None, None).unwrap();
        let job = job_repo::find_by_id(engine.database(), id).unwrap().unwrap();
        assert!(job.project_id.is_none());
        assert!(job.module_id.is_none());
        assert_eq!(job.directory, "/src");
    }

    #[test]
    fn test_start_outcome_serialization() {
        let failed = serde_json::to_value(StartOutcome::Failed("boom".to_string())).unwrap();
        assert_eq!(failed["outcome"], "failed");
        assert_eq!(failed["error"], "boom");
        let done = serde_json::to_value(StartOutcome::Completed).unwrap();
        assert_eq!(done["outcome"], "completed");
    }

    #[tokio::test]
    async fn test_is_running_false_when_idle() {
        let engine = engine();
        assert!(!engine.is_running(1));
        assert_eq!(engine.start(1).await.unwrap(), StartOutcome::NotFound);
        assert!(!engine.is_running(1));
    }

    #[test]
    fn test_is_running_agrees_with_guard_after_poison() {
        let engine = engine();
        let _guard = RunningGuard::acquire(&engine.running, 7).unwrap();

        let running = Arc::clone(&engine.running);
        let _ = std::thread::spawn(move || {
            let _held = running.lock().unwrap();
            panic!("poison the running set");
        })
        .join();

        assert!(engine.running.is_poisoned());
        assert!(engine.is_running(7));
        assert!(RunningGuard::acquire(&engine.running, 7).is_none());
    }
}
