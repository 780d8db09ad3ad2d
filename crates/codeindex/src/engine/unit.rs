//! Blocking per-function work. Everything here runs on a pool thread.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::code_repo::{self, NewCodeBlock};
use crate::db::task_repo::{self, TaskKey, TaskStatus};
use crate::db::{Database, DatabaseError};
use crate::embedding::Embedder;
use crate::error::SourceError;
use crate::extractor::{ExtractedFunction, FunctionExtractor};

/// Collaborators a unit needs, cheap to clone into pool closures.
#[derive(Clone)]
pub(crate) struct UnitContext {
    pub db: Database,
    pub embedder: Arc<dyn Embedder>,
    pub extractor: Arc<dyn FunctionExtractor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FunctionOutcome {
    /// Completed by an earlier run.
    Skipped,
    Completed,
    Failed(String),
}

pub(crate) fn read_functions(
    extractor: &dyn FunctionExtractor,
    path: &Path,
) -> Result<Vec<ExtractedFunction>, SourceError> {
    let source = std::fs::read_to_string(path).map_err(|e| SourceError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    extractor.extract(&source).map_err(|e| SourceError::Extract {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Embeds one function and records the result.
///
/// A task already completed for this job is skipped before the embedder
/// is called. Embedding and storage failures end up on the task row; only
/// a failure to write that row is returned as an error.
pub(crate) fn process_function(
    ctx: &UnitContext,
    job_id: i64,
    module_id: Option<i64>,
    file_path: &str,
    function: &ExtractedFunction,
) -> Result<FunctionOutcome, DatabaseError> {
    let key = TaskKey {
        job_id,
        file_path,
        function_name: &function.qualified_name,
    };

    if let Some(task) = task_repo::find_by_key(&ctx.db, &key)? {
        if task.status == TaskStatus::Completed {
            debug!(function = %function.qualified_name, "already completed, skipping");
            return Ok(FunctionOutcome::Skipped);
        }
    }

    let embedding = match ctx.embedder.embed(&function.code) {
        Ok(embedding) => embedding,
        Err(e) => return record_failure(&ctx.db, &key, e.to_string()),
    };

    let stored = ctx.db.with_transaction(|conn| {
        let file_id = code_repo::find_or_create_file_on(conn, file_path, module_id)?;
        code_repo::insert_block_on(
            conn,
            &NewCodeBlock {
                file_id,
                name: &function.qualified_name,
                code: &function.code,
                start_line: function.start_line,
                end_line: function.end_line,
                embedding: &embedding,
            },
        )?;
        task_repo::upsert_status_on(conn, &key, TaskStatus::Completed, None)
    });

    match stored {
        Ok(()) => Ok(FunctionOutcome::Completed),
        Err(e) => record_failure(&ctx.db, &key, e.to_string()),
    }
}

fn record_failure(
    db: &Database,
    key: &TaskKey<'_>,
    message: String,
) -> Result<FunctionOutcome, DatabaseError> {
    warn!(
        file = key.file_path,
        function = key.function_name,
        error = %message,
        "function failed"
    );
    task_repo::upsert_status(db, key, TaskStatus::Failed, Some(&message))?;
    Ok(FunctionOutcome::Failed(message))
}
