//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::engine::LifecycleConfig;
use crate::error::{Error, Result};
use crate::filter::SupportedBuilds;
use secrets::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TOPIC: &str = "build.mozilla-inbound.#";
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_HOOK: &str = "hooks/discover-tests";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// `host:port` of the feed relay.
    pub feed_addr: String,
    pub topic: String,
    pub workers: usize,
    pub queue_capacity: usize,
    /// TOML table of supported builds; the built-in table when unset.
    pub platforms_file: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub hook: PathBuf,
    pub drain_timeout: Option<Duration>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let queue_capacity = vars
            .parsed("INFORMANT_QUEUE_CAPACITY")?
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(Error::Config(
                "INFORMANT_QUEUE_CAPACITY must be positive".to_string(),
            ));
        }

        let workers = match vars.parsed::<usize>("INFORMANT_WORKERS")? {
            Some(0) => {
                return Err(Error::Config(
                    "INFORMANT_WORKERS must be positive".to_string(),
                ));
            }
            Some(n) => n,
            None => default_workers(),
        };

        Ok(Self {
            database_url: SecretString::from(vars.required("DATABASE_URL")?),
            feed_addr: vars.required("INFORMANT_FEED_ADDR")?,
            topic: vars
                .optional("INFORMANT_TOPIC")
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            workers,
            queue_capacity,
            platforms_file: vars.optional("INFORMANT_PLATFORMS").map(PathBuf::from),
            scratch_dir: vars
                .optional("INFORMANT_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("build-informant")),
            hook: vars
                .optional("INFORMANT_HOOK")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOOK)),
            drain_timeout: vars
                .parsed::<u64>("INFORMANT_DRAIN_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            otel_endpoint: vars.optional("OTEL_ENDPOINT"),
            log_level: vars
                .optional("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The supported build table this configuration names.
    pub fn supported_builds(&self) -> Result<SupportedBuilds> {
        match self.platforms_file {
            Some(ref path) => SupportedBuilds::load_from_file(path),
            None => Ok(SupportedBuilds::default()),
        }
    }

    /// Lifecycle settings derived from this configuration.
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            topic: self.topic.clone(),
            drain_timeout: self.drain_timeout,
            ..LifecycleConfig::default()
        }
    }
}

/// Host CPU count, the default worker count.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Unset and empty are the same thing.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid {name} {raw:?}: {e}")))
            })
            .transpose()
    }
}
