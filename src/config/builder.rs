// src/config/builder.rs

use super::{ConfigError, SourceConfig};
use crate::cli::Cli;
use crate::constants::{CACHE_DIR_ENV, DEFAULT_KILL_GRACE, DEFAULT_POLL_INTERVAL};
use crate::sandbox::{DnsConfig, ProcessLimits};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// A builder for creating a `SourceConfig`.
///
/// # Examples
///
/// ```
/// use gitsnap::config::SourceConfigBuilder;
///
/// let config = SourceConfigBuilder::new()
///     .cache_dir("/tmp/gitsnap-cache")
///     .nameservers(vec!["1.1.1.1".to_string()])
///     .build()
///     .unwrap();
/// assert_eq!(config.dns.unwrap().nameservers, vec!["1.1.1.1"]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SourceConfigBuilder {
    cache_dir: Option<PathBuf>,
    git_binary: Option<PathBuf>,
    nameservers: Vec<String>,
    search_domains: Vec<String>,
    dns_options: Vec<String>,
    hosts_file: Option<PathBuf>,
    kill_grace: Option<Duration>,
    poll_interval: Option<Duration>,
}

impl SourceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps parsed command-line arguments onto a builder.
    pub fn from_cli(cli: &Cli) -> Self {
        let mut builder = Self::new()
            .nameservers(cli.nameservers.clone())
            .search_domains(cli.search_domains.clone())
            .dns_options(cli.dns_options.clone())
            .kill_grace(Duration::from_secs(cli.kill_grace));
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir.clone());
        }
        if let Some(git) = &cli.git_binary {
            builder = builder.git_binary(git.clone());
        }
        if let Some(hosts) = &cli.hosts_file {
            builder = builder.hosts_file(hosts.clone());
        }
        builder
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git_binary = Some(git.into());
        self
    }

    pub fn nameservers(mut self, nameservers: Vec<String>) -> Self {
        self.nameservers = nameservers;
        self
    }

    pub fn search_domains(mut self, domains: Vec<String>) -> Self {
        self.search_domains = domains;
        self
    }

    pub fn dns_options(mut self, options: Vec<String>) -> Self {
        self.dns_options = options;
        self
    }

    pub fn hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_file = Some(path.into());
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = Some(grace);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Validates the options and builds the config.
    ///
    /// A DNS override is only configured when at least one nameserver, search
    /// domain or option was given.
    pub fn build(self) -> Result<SourceConfig, ConfigError> {
        for ns in &self.nameservers {
            if ns.parse::<IpAddr>().is_err() {
                return Err(ConfigError::InvalidValue {
                    option: "--nameserver".to_string(),
                    reason: format!("{:?} is not an IP address", ns),
                });
            }
        }
        if let Some(hosts) = &self.hosts_file {
            if !hosts.is_file() {
                return Err(ConfigError::InvalidValue {
                    option: "--hosts-file".to_string(),
                    reason: format!("{} is not a file", hosts.display()),
                });
            }
        }
        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                option: "poll_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };

        let dns = if self.nameservers.is_empty()
            && self.search_domains.is_empty()
            && self.dns_options.is_empty()
        {
            None
        } else {
            Some(DnsConfig {
                nameservers: self.nameservers,
                search_domains: self.search_domains,
                options: self.dns_options,
            })
        };

        Ok(SourceConfig {
            cache_dir,
            git_binary: self.git_binary.unwrap_or_else(|| PathBuf::from("git")),
            dns,
            hosts_file: self.hosts_file,
            limits: ProcessLimits {
                kill_grace: self.kill_grace.unwrap_or(DEFAULT_KILL_GRACE),
                poll_interval,
            },
        })
    }
}

fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    directories::ProjectDirs::from("", "", "gitsnap")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or(ConfigError::NoCacheDir)
}
