use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use codeindex::broadcast::JobPhase;
use codeindex::db::{code_repo, job_repo, project_repo};
use codeindex::{CodeIndexError, EngineError, JobEngine, StartOutcome};

#[derive(Parser)]
#[command(name = "codeindex")]
#[command(about = "Index a source tree into functions with embeddings", long_about = None)]
struct Cli {
    /// Config file (default: ~/.codeindex/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for codeindex
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job for a directory and run it
    Index {
        directory: PathBuf,
        /// Project the job belongs to, created when missing
        #[arg(long)]
        project: Option<String>,
        /// Module within the project; indexed files are attached to it
        #[arg(long, requires = "project")]
        module: Option<String>,
    },
    /// Run or resume one job
    Start { job_id: i64 },
    /// Resume every pending or running job
    Resume,
    /// List jobs
    Jobs,
    /// Show one job and its tasks as JSON
    Job { job_id: i64 },
    /// List projects and their modules
    Projects,
    /// List the code blocks stored for a file
    Blocks { path: PathBuf },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    CodeIndex(#[from] CodeIndexError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::CodeIndex(e.into())
    }
}

impl From<codeindex::db::DatabaseError> for CliError {
    fn from(e: codeindex::db::DatabaseError) -> Self {
        CliError::CodeIndex(e.into())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info,codeindex=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = tracing_log::LogTracer::init();
    }
}

/// Returns `false` when a job ended in failure.
fn run(cli: Cli) -> Result<bool, CliError> {
    let config = codeindex::load_or_default(cli.config.as_deref()).map_err(CodeIndexError::from)?;
    let engine = JobEngine::from_config(&config)?;

    match cli.command {
        Commands::Index {
            directory,
            project,
            module,
        } => {
            let job_id = engine.create_job(&directory, project.as_deref(), module.as_deref())?;
            println!("Created job {}", job_id);
            let outcome = block_on(run_job(&engine, job_id))??;
            Ok(report(job_id, &outcome))
        }
        Commands::Start { job_id } => {
            let outcome = block_on(run_job(&engine, job_id))??;
            Ok(report(job_id, &outcome))
        }
        Commands::Resume => {
            let outcomes = block_on(engine.resume_all())??;
            if outcomes.is_empty() {
                println!("No unfinished jobs");
            }
            let mut all_ok = true;
            for (job_id, outcome) in &outcomes {
                all_ok &= report(*job_id, outcome);
            }
            Ok(all_ok)
        }
        Commands::Jobs => {
            for job in job_repo::list(engine.database())? {
                println!(
                    "{:>5}  {:<9}  files {}/{}  functions {}/{}  {}",
                    job.id,
                    job.status.as_str(),
                    job.processed_files,
                    job.total_files,
                    job.processed_functions,
                    job.total_functions,
                    job.directory
                );
            }
            Ok(true)
        }
        Commands::Job { job_id } => {
            let snapshot = engine.snapshot(job_id)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(true)
        }
        Commands::Projects => {
            let db = engine.database();
            for project in project_repo::list_projects(db)? {
                println!("{:>5}  {}", project.id, project.name);
                for module in project_repo::list_modules(db, Some(project.id))? {
                    println!("{:>5}    {}", module.id, module.name);
                }
            }
            Ok(true)
        }
        Commands::Blocks { path } => {
            let db = engine.database();
            let lookup = std::path::absolute(&path).unwrap_or(path);
            let Some(file) = code_repo::find_file_by_path(db, &lookup.to_string_lossy())? else {
                println!("No indexed file at {}", lookup.display());
                return Ok(true);
            };
            for block in code_repo::list_blocks(db, file.id)? {
                println!(
                    "{:>6}  {}:{}-{}  {}  ({} dims)",
                    block.id,
                    file.path,
                    block.start_line,
                    block.end_line,
                    block.name,
                    block.embedding.len()
                );
            }
            Ok(true)
        }
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    Ok(runtime.block_on(future))
}

/// Runs one job while printing its progress events.
async fn run_job(engine: &JobEngine, job_id: i64) -> Result<StartOutcome, EngineError> {
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.job_id != job_id => continue,
                Ok(event) => match event.phase {
                    JobPhase::FunctionFailed => eprintln!(
                        "  failed {} in {}: {}",
                        event.function_name.as_deref().unwrap_or("?"),
                        event.file_path.as_deref().unwrap_or("?"),
                        event.error.as_deref().unwrap_or("")
                    ),
                    JobPhase::Progress => eprint!(
                        "\r  {}/{} functions, {}/{} files",
                        event.counters.processed_functions,
                        event.counters.total_functions,
                        event.counters.processed_files,
                        event.counters.total_files
                    ),
                    _ => eprintln!("{}", event.message),
                },
                Err(RecvError::Lagged(skipped)) => {
                    info!(skipped, "progress output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = engine.start(job_id).await;
    printer.abort();
    eprintln!();
    outcome
}

/// Prints the outcome; returns `false` for failures.
fn report(job_id: i64, outcome: &StartOutcome) -> bool {
    match outcome {
        StartOutcome::Completed => {
            println!("Job {} completed", job_id);
            true
        }
        StartOutcome::Failed(message) => {
            println!("Job {} failed: {}", job_id, message);
            false
        }
        StartOutcome::AlreadyRunning => {
            println!("Job {} is already running", job_id);
            true
        }
        StartOutcome::NotFound => {
            println!("Job {} not found", job_id);
            false
        }
    }
}
