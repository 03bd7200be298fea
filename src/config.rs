//! Runtime configuration.
//!
//! Sources, later wins:
//! 1. Built-in defaults (precision capped at [`DEFAULT_MAX_PRECISION`],
//!    iterations unlimited)
//! 2. JSON file: `$ESCAPE_CAL_CONFIG`, else `<config dir>/escape-cal/config.json`
//! 3. Environment: `ESCAPE_CAL_MAX_PRECISION`, `ESCAPE_CAL_MAX_ITERATIONS`,
//!    `ESCAPE_CAL_LOG`
//!
//! Limits only ever reject requests. A request inside the limits produces
//! the same reply it would without them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ESCAPE_CAL_CONFIG";

/// Default precision ceiling in bits. Enough for deep zooms while keeping
/// each request's working set in the low megabytes.
pub const DEFAULT_MAX_PRECISION: u32 = 1 << 20;

const MAX_PRECISION_ENV: &str = "ESCAPE_CAL_MAX_PRECISION";
const MAX_ITERATIONS_ENV: &str = "ESCAPE_CAL_MAX_ITERATIONS";
const LOG_ENV: &str = "ESCAPE_CAL_LOG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Reject `CAL` requests asking for more bits than this.
    pub max_precision: u32,
    /// Reject `CAL` requests asking for more iterations than this.
    pub max_iterations: Option<u64>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_precision: DEFAULT_MAX_PRECISION,
            max_iterations: None,
            log_filter: None,
        }
    }
}

impl Config {
    /// Load configuration from the file (if any) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `$ESCAPE_CAL_CONFIG` points at a missing file, if
    /// the file is not valid JSON for [`Config`], or if an environment
    /// override does not parse.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse config JSON")
    }

    /// Overlay environment overrides, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MAX_PRECISION_ENV) {
            self.max_precision = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", MAX_PRECISION_ENV, value))?;
        }
        if let Some(value) = lookup(MAX_ITERATIONS_ENV) {
            self.max_iterations = Some(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid {}: {}", MAX_ITERATIONS_ENV, value))?,
            );
        }
        if let Some(value) = lookup(LOG_ENV) {
            self.log_filter = Some(value);
        }
        Ok(())
    }

    /// Tracing filter to use when `RUST_LOG` is unset.
    pub fn log_filter_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.log_filter.as_deref().unwrap_or(fallback)
    }
}

/// Resolve the config file path.
///
/// Resolution order:
/// 1. `$ESCAPE_CAL_CONFIG` (used even if missing, so typos surface)
/// 2. `<config dir>/escape-cal/config.json` if it exists
///    (`~/.config` on Linux, `~/Library/Application Support` on macOS)
fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(explicit));
    }

    let default = dirs::config_dir()?.join("escape-cal").join("config.json");
    default.exists().then_some(default)
}
