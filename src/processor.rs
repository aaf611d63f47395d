//! Per-build processing: the work a pool worker does for one build.
//!
//! [`HookProcessor`] gives every build a scratch directory, writes the build
//! record there, runs an external test-discovery executable inside it, and
//! records what it reported. The directory is registered with the
//! [`ResourceTracker`] and left in place until shutdown cleanup.

use crate::error::{Error, Result};
use crate::model::{BuildEvent, WorkResult};
use crate::resources::ResourceTracker;
use crate::store::ResultStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// File the hook may write to report its outcome.
pub const RESULT_FILE: &str = "result.json";
/// Build record written before the hook runs.
pub const BUILD_FILE: &str = "build.json";

/// Does the long-running work for one accepted build.
#[async_trait]
pub trait BuildProcessor: Send + Sync {
    async fn process(&self, event: &BuildEvent) -> Result<WorkResult>;
}

/// Runs a discovery hook per build and stores the result.
pub struct HookProcessor<S> {
    hook: PathBuf,
    scratch_base: PathBuf,
    resources: Arc<ResourceTracker>,
    store: Arc<S>,
}

impl<S: ResultStore> HookProcessor<S> {
    pub fn new(
        hook: PathBuf,
        scratch_base: PathBuf,
        resources: Arc<ResourceTracker>,
        store: Arc<S>,
    ) -> Self {
        Self {
            hook,
            scratch_base,
            resources,
            store,
        }
    }

    /// Scratch directory for a build, created and registered on first use.
    /// A build seen again reuses its directory.
    async fn scratch_dir(&self, event: &BuildEvent) -> Result<PathBuf> {
        let key = event.resource_key();
        if let Some(existing) = self.resources.get(&key) {
            if existing.is_dir() {
                return Ok(existing);
            }
        }
        let dir = self.scratch_base.join(sanitize(&key));
        // Track before creating: an abort mid-create must not leak the dir.
        self.resources.register(key, dir.clone());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn run_hook(&self, dir: &Path, event: &BuildEvent) -> Result<()> {
        // Resolve relative hooks against the process CWD: with current_dir
        // set, Command would look for them inside the scratch dir.
        let hook = if self.hook.is_relative() {
            std::env::current_dir()?.join(&self.hook)
        } else {
            self.hook.clone()
        };

        debug!(build_id = %event.build_id, hook = %hook.display(), "running hook");

        let status = Command::new(&hook)
            .current_dir(dir)
            .env("INFORMANT_SCRATCH_DIR", dir)
            .env("INFORMANT_BUILD_ID", event.build_id.as_str())
            .env("INFORMANT_PLATFORM", &event.platform)
            .env("INFORMANT_BUILD_TYPE", &event.build_type)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Hook {
                phase: "spawn".to_string(),
                message: format!("{}: {e}", hook.display()),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Hook {
                phase: "discover".to_string(),
                message: format!("exited with status {}", status.code().unwrap_or(-1)),
            })
        }
    }
}

#[async_trait]
impl<S: ResultStore + 'static> BuildProcessor for HookProcessor<S> {
    async fn process(&self, event: &BuildEvent) -> Result<WorkResult> {
        let start = Instant::now();
        let dir = self.scratch_dir(event).await?;

        let record = serde_json::to_vec_pretty(event)?;
        tokio::fs::write(dir.join(BUILD_FILE), record).await?;

        self.run_hook(&dir, event).await?;

        let outcome = match tokio::fs::read(dir.join(RESULT_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Hook {
                phase: "result".to_string(),
                message: format!("bad {RESULT_FILE}: {e}"),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(e.into()),
        };

        let result = WorkResult {
            build_id: event.build_id.clone(),
            platform: event.platform.clone(),
            build_type: event.build_type.clone(),
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
            finished_at: chrono::Utc::now(),
        };
        self.store.record(&result).await?;
        Ok(result)
    }
}

/// Build ids come off the wire; keep them to one safe path component.
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
