//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (EXPLORER_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [explorer]
//! thread_count = 0
//! lock_path = "/tmp/explorer.lock"
//!
//! [blend]
//! default_level = 2
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! EXPLORER_EXPLORER__THREAD_COUNT=8
//! EXPLORER_BLEND__DEFAULT_LEVEL=4
//! ```

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration, merged from `config.toml`, `config.local.toml`,
/// and `EXPLORER_*` environment variables, in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub blend: BlendDomainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the exploration driver itself (C7): how many compile workers
/// to spawn, how long a single kernel run may take, and where the advisory
/// lock file lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Number of parallel compile-worker threads. 0 means "use all available
    /// CPU cores" (resolved at startup via `num_cpus::get()`).
    #[serde(default)]
    pub thread_count: usize,

    /// Per-run timeout in seconds. `None` means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Path to the advisory lock file guarding a single exploration run at a
    /// time against the same program directory.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("./explorer.lock")
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        ExplorerConfig {
            thread_count: 0,
            timeout_secs: None,
            lock_path: default_lock_path(),
        }
    }
}

/// Default blend-space domain settings, used when the CLI's `--full` flag is
/// given without an explicit level or sample size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendDomainConfig {
    /// Default `--full` level (0-4) when the CLI flag carries no value.
    #[serde(default = "default_level")]
    pub default_level: u8,

    /// Default sample size cap for `ExploreAll`. `None` means "no cap".
    #[serde(default)]
    pub sample: Option<usize>,

    /// Default RNG seed for sampling. `None` draws a fresh seed per run.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Bypass the per-flag-set enumeration cache.
    #[serde(default)]
    pub no_cache: bool,
}

fn default_level() -> u8 {
    2
}

impl Default for BlendDomainConfig {
    fn default() -> Self {
        BlendDomainConfig {
            default_level: default_level(),
            sample: None,
            seed: None,
            no_cache: false,
        }
    }
}

/// Logging configuration (C10.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive (e.g. "info",
    /// "explorer=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"human"` for the default `fmt` layer, `"json"` for structured output.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// When set, logs are written to a daily-rolling file in this directory
    /// instead of stderr.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (EXPLORER_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("EXPLORER_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("EXPLORER_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            explorer: ExplorerConfig::default(),
            blend: BlendDomainConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
