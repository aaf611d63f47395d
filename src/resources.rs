//! Scratch resources allocated by workers, reclaimed at shutdown.
//!
//! Workers register the directories they create under a stable key. Entries
//! are never removed per item: a directory may be reused or inspected while
//! its build is alive, and all of them are reclaimed in one pass after the
//! pool has drained.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Shared registry of key -> scratch path.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    entries: Mutex<HashMap<String, PathBuf>>,
}

/// Summary of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Paths that existed and were removed.
    pub removed: Vec<PathBuf>,
    /// Entries whose path was already gone.
    pub missing: usize,
    /// Paths that could not be removed, with the error message.
    pub failed: Vec<(PathBuf, String)>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the resource for `key`.
    ///
    /// Returns the path previously registered under the key, if any. The
    /// replaced path is no longer tracked; the caller owns it from here.
    pub fn register(&self, key: impl Into<String>, path: impl Into<PathBuf>) -> Option<PathBuf> {
        let key = key.into();
        let path = path.into();
        debug!(key = %key, path = %path.display(), "resource registered");
        self.entries.lock().insert(key, path)
    }

    pub fn get(&self, key: &str) -> Option<PathBuf> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<(String, PathBuf)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove every tracked path that still exists.
    ///
    /// Empties the registry. A failure on one entry is logged and does not
    /// stop the others.
    pub async fn cleanup(&self) -> CleanupReport {
        let entries: Vec<(String, PathBuf)> = self.entries.lock().drain().collect();
        let mut report = CleanupReport::default();

        for (key, path) in entries {
            if !is_present(&path).await {
                report.missing += 1;
                continue;
            }
            match remove_path(&path).await {
                Ok(()) => {
                    debug!(key = %key, path = %path.display(), "resource removed");
                    metrics::cleanup_operations().add(1, &[KeyValue::new("result", "removed")]);
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(key = %key, path = %path.display(), error = %e, "cleanup failed");
                    metrics::cleanup_operations().add(1, &[KeyValue::new("result", "error")]);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            removed = report.removed.len(),
            missing = report.missing,
            failed = report.failed.len(),
            "resource cleanup finished"
        );
        report
    }
}

async fn is_present(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
