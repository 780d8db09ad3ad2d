//! Directory enumeration: the file list and the task rows of a job.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::db::task_repo::{self, TaskKey};
use crate::db::Database;
use crate::error::EngineError;
use crate::extractor::FunctionExtractor;
use crate::worker::SourceScanner;

use super::unit::read_functions;

#[derive(Debug, Default)]
pub(crate) struct Enumeration {
    /// Files with at least one function, in scan order.
    pub files: Vec<PathBuf>,
    pub total_files: u64,
    pub total_functions: u64,
}

/// Scans `root`, extracts every readable file and brings the job's task set
/// in line with what was found: a pending task per new function, existing
/// tasks kept as they are, and tasks whose function or file is gone removed.
///
/// Scan errors at the root and database errors are fatal. A file that
/// cannot be read or parsed is logged and left out of the totals and of
/// the task set.
pub(crate) fn enumerate(
    db: &Database,
    extractor: &dyn FunctionExtractor,
    scan: &ScanConfig,
    job_id: i64,
    root: &Path,
) -> Result<Enumeration, EngineError> {
    let candidates = SourceScanner::new(root, scan).scan()?;
    let mut enumeration = Enumeration::default();
    let mut discovered: Vec<(String, Vec<String>)> = Vec::new();

    for path in candidates {
        if !extractor.supports(&path) {
            debug!(path = %path.display(), language = extractor.language(), "unsupported file");
            continue;
        }

        let functions = match read_functions(extractor, &path) {
            Ok(functions) => functions,
            Err(e) => {
                warn!("Skipping {}", e);
                continue;
            }
        };

        enumeration.total_files += 1;
        enumeration.total_functions += functions.len() as u64;
        if functions.is_empty() {
            continue;
        }
        let names = functions.into_iter().map(|f| f.qualified_name).collect();
        discovered.push((path.to_string_lossy().into_owned(), names));
        enumeration.files.push(path);
    }

    let (created, removed) = db.with_transaction(|conn| {
        let mut created = 0usize;
        let mut current = HashSet::new();
        for (file_path, names) in &discovered {
            for name in names {
                let key = TaskKey {
                    job_id,
                    file_path,
                    function_name: name,
                };
                if task_repo::insert_if_absent_on(conn, &key)? {
                    created += 1;
                }
                current.insert((file_path.as_str(), name.as_str()));
            }
        }
        let removed = task_repo::delete_stale_on(conn, job_id, &current)?;
        Ok((created, removed))
    })?;

    info!(
        files = enumeration.total_files,
        functions = enumeration.total_functions,
        new_tasks = created,
        stale_tasks = removed,
        "enumeration finished"
    );
    Ok(enumeration)
}
