// src/sandbox/mod.rs
//! Execution of git subprocesses in a constrained environment.
//!
//! A `Sandbox` knows how to:
//! - Prepare a per-CLI network override (merged resolv.conf, custom hosts file).
//! - Spawn a command with a replaced environment in its own process group.
//! - Tie the child's lifetime to a `CancellationToken`, escalating from
//!   SIGTERM to SIGKILL on the whole group.
//!
//! The implementation is chosen per platform by `default_sandbox`, and can be
//! swapped through `GitSource::with_sandbox`.

mod host;
#[cfg(target_os = "linux")]
mod linux;
mod network;
mod process;

use crate::cancellation::CancellationToken;
use crate::constants::{DEFAULT_KILL_GRACE, DEFAULT_POLL_INTERVAL};
use crate::errors::{GitCommandError, Result};
use std::fmt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

pub use host::HostSandbox;
#[cfg(target_os = "linux")]
pub use linux::NamespaceSandbox;
pub use network::{client_domain, merge_resolv_conf, DnsConfig, NetworkOverride};

/// A fully built command, ready to be handed to a sandbox.
#[derive(Debug)]
pub struct SandboxCommand<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    /// The complete environment of the child. Nothing is inherited.
    pub env: &'a [(String, String)],
    pub current_dir: Option<&'a Path>,
    pub network: Option<&'a NetworkOverride>,
    /// Redacted description of the command for errors and logs.
    pub display_args: &'a str,
}

/// Captured result of a command that ran to completion.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Timing knobs for waiting on and terminating children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Wait between SIGTERM and SIGKILL after cancellation.
    pub kill_grace: Duration,
    /// How often the child is polled for exit and the token for cancellation.
    pub poll_interval: Duration,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Platform-specific execution of git subprocesses.
pub trait Sandbox: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Builds the network override for a git CLI, or fails if this platform
    /// cannot apply one. Returns `None` when nothing is overridden.
    fn prepare_network(
        &self,
        dns: Option<&DnsConfig>,
        hosts: Option<&Path>,
    ) -> Result<Option<NetworkOverride>>;

    /// Runs `cmd` to completion, or until `token` is cancelled.
    fn run(
        &self,
        cmd: &SandboxCommand<'_>,
        token: &CancellationToken,
    ) -> std::result::Result<CommandOutput, GitCommandError>;
}

/// The sandbox for the current platform.
///
/// On Linux this unshares a mount namespace for commands that carry a network
/// override. Elsewhere network overrides are rejected.
pub fn default_sandbox(limits: ProcessLimits) -> Arc<dyn Sandbox> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(NamespaceSandbox::new(limits))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(HostSandbox::new(limits))
    }
}
