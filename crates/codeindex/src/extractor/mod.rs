//! Function extraction from source text.

use std::path::Path;

use serde::Serialize;

use crate::error::ExtractError;

pub mod python;

pub use python::PythonExtractor;

/// A function definition found in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFunction {
    /// Name as written after `def`.
    pub name: String,
    /// Dotted path through enclosing classes and functions, e.g. `Parser.parse`.
    /// Unique within one file; used as the task key.
    pub qualified_name: String,
    /// Source lines of the definition.
    pub code: String,
    /// First line, 1-based.
    pub start_line: u32,
    /// Last line, 1-based and inclusive.
    pub end_line: u32,
}

/// Finds function definitions in source text. Implementations are pure and
/// deterministic: the same input always yields the same functions in the
/// same order.
pub trait FunctionExtractor: Send + Sync {
    /// Human readable language name, for logs.
    fn language(&self) -> &'static str;

    /// File extensions (without the dot) this extractor understands.
    fn extensions(&self) -> &'static [&'static str];

    fn extract(&self, source: &str) -> Result<Vec<ExtractedFunction>, ExtractError>;

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions().iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}
