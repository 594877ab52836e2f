//! Sandbox for platforms without mount namespaces.

use super::process::{base_command, run_to_completion};
use super::{CommandOutput, DnsConfig, NetworkOverride, ProcessLimits, Sandbox, SandboxCommand};
use crate::cancellation::CancellationToken;
use crate::errors::{Error, GitCommandError, Result};
use std::path::Path;

/// Runs git directly on the host, with a replaced environment and process-group
/// cancellation but no network override.
#[derive(Debug, Clone)]
pub struct HostSandbox {
    limits: ProcessLimits,
}

impl HostSandbox {
    pub fn new(limits: ProcessLimits) -> Self {
        Self { limits }
    }
}

impl Sandbox for HostSandbox {
    fn name(&self) -> &'static str {
        "host"
    }

    fn prepare_network(
        &self,
        dns: Option<&DnsConfig>,
        hosts: Option<&Path>,
    ) -> Result<Option<NetworkOverride>> {
        if dns.is_some() || hosts.is_some() {
            return Err(Error::UnsupportedPlatform {
                platform: std::env::consts::OS,
            });
        }
        Ok(None)
    }

    fn run(
        &self,
        cmd: &SandboxCommand<'_>,
        token: &CancellationToken,
    ) -> std::result::Result<CommandOutput, GitCommandError> {
        #[allow(unused_mut)]
        let mut command = base_command(cmd);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: umask(2) is async-signal-safe and touches no shared state.
            unsafe {
                command.pre_exec(|| {
                    libc::umask(0o022);
                    Ok(())
                });
            }
        }
        run_to_completion(command, cmd.display_args, token, self.limits)
    }
}
