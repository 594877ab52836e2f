//! Defines `SourceConfig`, the process-wide settings of a `GitSource`.
//!
//! Settings are assembled with `SourceConfigBuilder`, either programmatically
//! or from parsed CLI arguments, and validated once at build time.

use crate::sandbox::{DnsConfig, ProcessLimits};
use std::path::PathBuf;
use thiserror::Error;

pub use builder::SourceConfigBuilder;
mod builder;

/// Errors raised while building a `SourceConfig`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An option has a value that cannot be used.
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidValue { option: String, reason: String },

    /// No cache directory was given and no platform default exists.
    #[error("Could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// Settings shared by every resolution of a `GitSource`.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Root directory of the local cache accessor.
    pub cache_dir: PathBuf,
    /// The `git` executable; a bare name is looked up on `PATH`.
    pub git_binary: PathBuf,
    /// Resolver override applied to every networked git command.
    pub dns: Option<DnsConfig>,
    /// File bind-mounted over `/etc/hosts` for networked git commands.
    pub hosts_file: Option<PathBuf>,
    /// Subprocess wait and termination timing.
    pub limits: ProcessLimits,
}

impl SourceConfig {
    pub fn builder() -> SourceConfigBuilder {
        SourceConfigBuilder::new()
    }

    #[doc(hidden)]
    pub fn default_for_test(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            git_binary: PathBuf::from("git"),
            dns: None,
            hosts_file: None,
            limits: ProcessLimits::default(),
        }
    }
}
