//! Core data model.
//!
//! A build event is one build-completion notification from the feed. It is
//! immutable once decoded and occupies at most one queue slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Build Event
// ---------------------------------------------------------------------------

/// A finished build as announced by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Unique per build.
    #[serde(rename = "buildid")]
    pub build_id: BuildId,

    /// Platform the build targets (e.g., "linux64", "win32").
    pub platform: String,

    /// Build flavour (e.g., "opt", "debug").
    #[serde(rename = "buildtype")]
    pub build_type: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Every other payload field, untouched. Processing reads test package
    /// locations and revisions from here; the core never does.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BuildEvent {
    /// Build an event with no tags and no extra payload fields.
    pub fn new(
        build_id: impl Into<String>,
        platform: impl Into<String>,
        build_type: impl Into<String>,
    ) -> Self {
        Self {
            build_id: BuildId(build_id.into()),
            platform: platform.into(),
            build_type: build_type.into(),
            tags: BTreeSet::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Add a tag (builder style).
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Stable key for resources allocated while processing this build.
    ///
    /// Build ids are timestamps shared by every platform built from the
    /// same push, so the key includes platform and build type.
    pub fn resource_key(&self) -> String {
        format!("{}-{}-{}", self.build_id, self.platform, self.build_type)
    }

    /// Decode the event from a feed message body.
    ///
    /// The normalized build feed nests the build record under `payload`.
    pub fn from_body(body: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let payload = body.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(payload)
    }
}

/// Newtype for build identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub String);

impl BuildId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BuildId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Work Result
// ---------------------------------------------------------------------------

/// Outcome of processing one build. Opaque to the dispatch core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    pub build_id: BuildId,
    pub platform: String,
    pub build_type: String,
    /// Whatever the processing step reported. Not interpreted here.
    pub outcome: serde_json::Value,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}
