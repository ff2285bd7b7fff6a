//! Engine-wide scan defaults.
//!
//! Values come from [`EngineConfig::default`], optionally a JSON document, and
//! finally `STRATA_*` environment variables, in that order of precedence
//! (later wins).

use crate::error::{Error, Result};
use crate::executor::ExecMode;
use crate::format::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "STRATA_";

/// Where environment overrides are read from.
pub trait EnvSource {
    /// Value of `STRATA_{key}`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{ENV_PREFIX}{key}")).ok()
    }
}

/// Defaults applied to every scan built with [`ScannerBuilder::config`](crate::scanner::ScannerBuilder::config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum rows per scanned batch.
    pub batch_size: usize,
    /// Worker threads for fragment-parallel work; `None` uses every CPU.
    pub io_threads: Option<usize>,
    /// Run fragment work on the pool instead of the calling thread.
    pub use_threads: bool,
    /// Upper bound in bytes for materialised scan results.
    pub memory_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            io_threads: None,
            use_threads: true,
            memory_limit: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    /// [`Error::Invalid`] on malformed JSON or out-of-range values.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::invalid(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    /// [`Error::Invalid`] if a variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(&StdEnvSource)
    }

    /// Apply `STRATA_BATCH_SIZE`, `STRATA_IO_THREADS`, `STRATA_USE_THREADS`
    /// and `STRATA_MEMORY_LIMIT` from `env`.
    ///
    /// # Errors
    /// [`Error::Invalid`] if a variable does not parse.
    pub fn with_env(mut self, env: &dyn EnvSource) -> Result<Self> {
        if let Some(v) = parse_var(env, "BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = parse_var(env, "IO_THREADS")? {
            self.io_threads = Some(v);
        }
        if let Some(v) = parse_var(env, "USE_THREADS")? {
            self.use_threads = v;
        }
        if let Some(v) = parse_var(env, "MEMORY_LIMIT")? {
            self.memory_limit = Some(v);
        }
        self.validate()?;
        Ok(self)
    }

    /// # Errors
    /// [`Error::Invalid`] for a zero batch size or thread count.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size must be at least 1"));
        }
        if self.io_threads == Some(0) {
            return Err(Error::invalid("io_threads must be at least 1"));
        }
        Ok(())
    }

    /// Scheduling mode these settings describe.
    #[must_use]
    pub const fn exec_mode(&self) -> ExecMode {
        if self.use_threads {
            ExecMode::Parallel {
                threads: self.io_threads,
            }
        } else {
            ExecMode::Sequential
        }
    }
}

fn parse_var<T>(env: &dyn EnvSource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env.get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                Error::invalid(format!("{ENV_PREFIX}{key}={raw} does not parse: {e}"))
            })
        })
        .transpose()
}
