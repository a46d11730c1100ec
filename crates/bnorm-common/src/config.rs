//! Dispatch configuration with TOML, environment variable, and default
//! config sources.

use std::path::Path;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

// ── Errors ──────────────────────────────────────────────────────────

/// Errors produced by configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── DispatchBackend ─────────────────────────────────────────────────

/// Execution substrate for normalization work units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchBackend {
    /// Rayon for large tensors, the calling thread below the parallel threshold.
    #[default]
    Auto,
    Sequential,
    Rayon,
}

impl fmt::Display for DispatchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Sequential => write!(f, "sequential"),
            Self::Rayon => write!(f, "rayon"),
        }
    }
}

impl std::str::FromStr for DispatchBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sequential" | "serial" => Ok(Self::Sequential),
            "rayon" | "parallel" => Ok(Self::Rayon),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[dispatch]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    dispatch: DispatchConfig,
}

// ── DispatchConfig ──────────────────────────────────────────────────

/// Default element count below which `Auto` stays on the calling thread.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// How configured operations hand their work units to workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend: DispatchBackend,
    /// Dedicated worker count; `None` uses the global rayon pool.
    pub num_threads: Option<usize>,
    /// Rows per task; `None` derives it from the row length.
    pub units_per_task: Option<usize>,
    /// Element count below which `Auto` runs sequentially.
    pub parallel_threshold: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: DispatchBackend::Auto,
            num_threads: None,
            units_per_task: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl DispatchConfig {
    /// Configuration that keeps all work on the calling thread.
    pub fn sequential() -> Self {
        Self { backend: DispatchBackend::Sequential, ..Self::default() }
    }

    // ── Constructors ────────────────────────────────────────────

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[dispatch]` table. If the file
    /// does not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!("Config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let wrapper: TomlWrapper = toml::from_str(&text)?;
        Ok(wrapper.dispatch)
    }

    /// Serialize to a TOML string (wrapped in `[dispatch]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { dispatch: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Build a config from `BNORM_*` environment vars merged on top of
    /// `Self::default()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("BNORM_DISPATCH_BACKEND") {
            cfg.backend = v.parse()?;
        }
        if let Ok(v) = env::var("BNORM_NUM_THREADS") {
            cfg.num_threads = Some(Self::parse_env_usize("BNORM_NUM_THREADS", &v)?);
        }
        if let Ok(v) = env::var("BNORM_UNITS_PER_TASK") {
            cfg.units_per_task = Some(Self::parse_env_usize("BNORM_UNITS_PER_TASK", &v)?);
        }
        if let Ok(v) = env::var("BNORM_PARALLEL_THRESHOLD") {
            cfg.parallel_threshold = Self::parse_env_usize("BNORM_PARALLEL_THRESHOLD", &v)?;
        }

        Ok(cfg)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == Some(0) {
            return Err(ConfigError::Validation("num_threads must be > 0 when set".into()));
        }
        if self.units_per_task == Some(0) {
            return Err(ConfigError::Validation("units_per_task must be > 0 when set".into()));
        }
        if self.backend == DispatchBackend::Sequential && self.num_threads.is_some() {
            return Err(ConfigError::Validation(
                "num_threads has no effect with the sequential backend".into(),
            ));
        }
        Ok(())
    }

    // ── Merge ───────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        let d = Self::default();
        Self {
            backend: if other.backend == d.backend { self.backend } else { other.backend },
            num_threads: other.num_threads.or(self.num_threads),
            units_per_task: other.units_per_task.or(self.units_per_task),
            parallel_threshold: if other.parallel_threshold == d.parallel_threshold {
                self.parallel_threshold
            } else {
                other.parallel_threshold
            },
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn parse_env_usize(key: &str, val: &str) -> Result<usize, ConfigError> {
        val.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: val.to_string(),
        })
    }
}

#[cfg(test)]
mod tests;
