//! Build filter and the supported (platform, build type) table.
//!
//! The filter is a pure predicate: it holds an immutable table and can be
//! shared across any number of ingestion paths.

use crate::error::{Error, Result};
use crate::model::BuildEvent;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Tag carried by localization repacks. Those never run test suites.
pub const LOCALIZATION_TAG: &str = "l10n";

const DEFAULT_BUILDS: &[(&str, &str)] = &[
    ("linux", "opt"),
    ("linux", "debug"),
    ("linux64", "opt"),
    ("linux64", "debug"),
    ("linux64-asan", "opt"),
    ("macosx64", "opt"),
    ("macosx64", "debug"),
    ("win32", "opt"),
    ("win32", "debug"),
    ("win64", "opt"),
    ("win64", "debug"),
    ("android-api-11", "opt"),
];

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct BuildTable {
    #[serde(default)]
    build: Vec<BuildEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    platform: String,
    buildtype: String,
}

/// The set of (platform, build type) pairs we have suites for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedBuilds {
    by_platform: HashMap<String, HashSet<String>>,
}

impl SupportedBuilds {
    pub fn new<I, P, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<String>,
    {
        let mut by_platform: HashMap<String, HashSet<String>> = HashMap::new();
        for (platform, build_type) in pairs {
            by_platform
                .entry(platform.into())
                .or_default()
                .insert(build_type.into());
        }
        Self { by_platform }
    }

    /// Parse a TOML table of `[[build]]` entries.
    pub fn from_toml(content: &str) -> Result<Self> {
        let table: BuildTable = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad supported builds table: {e}")))?;
        Ok(Self::new(
            table.build.into_iter().map(|e| (e.platform, e.buildtype)),
        ))
    }

    /// Load the table from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read builds table {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn contains(&self, platform: &str, build_type: &str) -> bool {
        self.by_platform
            .get(platform)
            .is_some_and(|types| types.contains(build_type))
    }

    /// Number of (platform, build type) pairs.
    pub fn len(&self) -> usize {
        self.by_platform.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All pairs, sorted, for display.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .by_platform
            .iter()
            .flat_map(|(p, types)| types.iter().map(move |b| (p.as_str(), b.as_str())))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

impl Default for SupportedBuilds {
    fn default() -> Self {
        Self::new(DEFAULT_BUILDS.iter().copied())
    }
}

/// Why a build was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Tagged as a localization repack.
    Localization,
    /// No suites run against this (platform, build type).
    Unsupported,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Localization => "localization",
            Rejection::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless build predicate.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    supported: SupportedBuilds,
}

impl Filter {
    pub fn new(supported: SupportedBuilds) -> Self {
        Self { supported }
    }

    /// Check an event against the rules, in order.
    pub fn check(&self, event: &BuildEvent) -> std::result::Result<(), Rejection> {
        if event.tags.contains(LOCALIZATION_TAG) {
            return Err(Rejection::Localization);
        }
        if !self.supported.contains(&event.platform, &event.build_type) {
            return Err(Rejection::Unsupported);
        }
        Ok(())
    }

    pub fn accept(&self, event: &BuildEvent) -> bool {
        self.check(event).is_ok()
    }

    pub fn supported(&self) -> &SupportedBuilds {
        &self.supported
    }
}
