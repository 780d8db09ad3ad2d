use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeIndexError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to initialise parser: {0}")]
    Parser(String),

    #[error("Syntax error near line {line}")]
    Syntax { line: u32 },
}

/// A source file that could not be turned into functions.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shut down")]
    ChannelClosed,

    #[error("Worker dropped the job before finishing it")]
    Dropped,

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Errors that end a job run. Everything below the enumeration phase is
/// recorded on task rows instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("A module needs a project")]
    ModuleWithoutProject,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, CodeIndexError>;
