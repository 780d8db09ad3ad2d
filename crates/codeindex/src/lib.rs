pub mod broadcast;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, load_or_default, Config};
pub use db::Database;
pub use embedding::{build_embedder, Embedder, EmbeddingProvider};
pub use engine::{JobEngine, JobSnapshot, StartOutcome};
pub use error::{CodeIndexError, ConfigError, EngineError, Result, WorkerError};
pub use extractor::{FunctionExtractor, PythonExtractor};
pub use worker::WorkerPool;
