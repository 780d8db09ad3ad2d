use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanConfig;
use crate::error::EngineError;

/// Recursively lists source files under a root directory.
pub struct SourceScanner {
    root: PathBuf,
    extensions: HashSet<String>,
    skip_dirs: HashSet<String>,
}

impl SourceScanner {
    pub fn new<P: AsRef<Path>>(root: P, config: &ScanConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            skip_dirs: config.skip_dirs.iter().cloned().collect(),
        }
    }

    /// Returns matching files in a stable order.
    ///
    /// A missing or unreadable root is an error. Unreadable entries below
    /// the root are logged and skipped.
    pub fn scan(&self) -> Result<Vec<PathBuf>, EngineError> {
        if !self.root.is_dir() {
            return Err(EngineError::NotADirectory(self.root.clone()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_skipped_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(EngineError::ScanFailed {
                        path: self.root.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if self.has_source_extension(entry.path()) {
                debug!("Found source file: {}", entry.path().display());
                files.push(entry.into_path());
            }
        }

        info!(
            "Scanned {} source files in {}",
            files.len(),
            self.root.display()
        );
        Ok(files)
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.skip_dirs.contains(name.as_ref())
    }

    fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}
