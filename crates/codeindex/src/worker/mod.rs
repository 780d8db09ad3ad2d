pub mod pool;
pub mod scanner;

pub use pool::WorkerPool;
pub use scanner::SourceScanner;
