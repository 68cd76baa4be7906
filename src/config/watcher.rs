use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Changed(PathBuf),
    Error(String),
}

/// Watches the settings files and reports writes to them.
///
/// The underlying notify backend commonly reports a single save as several
/// modify events; consumers must tolerate duplicates.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new<F>(files: Vec<PathBuf>, on_event: F) -> Result<Self>
    where
        F: Fn(ConfigEvent) + Send + 'static,
    {
        let dirs = Self::watch_dirs(&files);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        for path in event.paths {
                            if let Some(file) = Self::watched_file(&files, &path) {
                                on_event(ConfigEvent::Changed(file.clone()));
                            }
                        }
                    }
                }
                Err(e) => {
                    on_event(ConfigEvent::Error(e.to_string()));
                }
            }
        })
        .map_err(|e| BridgeError::Config(format!("Failed to create watcher: {}", e)))?;

        for dir in dirs {
            if dir.exists() {
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|e| BridgeError::Config(format!("Failed to watch {}: {}", dir.display(), e)))?;
                tracing::debug!("Watching {} for settings changes", dir.display());
            }
        }

        Ok(Self { _watcher: watcher })
    }

    fn watch_dirs(files: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// The configured path for `path`, so callers can compare against it
    fn watched_file<'a>(files: &'a [PathBuf], path: &Path) -> Option<&'a PathBuf> {
        files.iter().find(|f| {
            *f == path || (f.file_name() == path.file_name() && f.parent() == path.parent())
        })
    }
}
