//! Linux sandbox: private mount namespace with bind-mounted resolver files.

use super::process::{base_command, run_to_completion};
use super::{CommandOutput, DnsConfig, NetworkOverride, ProcessLimits, Sandbox, SandboxCommand};
use crate::cancellation::CancellationToken;
use crate::errors::{GitCommandError, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::ptr;

/// Runs each git command in its own process group. Commands carrying a
/// network override additionally get a private mount namespace in which the
/// override files are bind-mounted over `/etc/hosts` and `/etc/resolv.conf`.
///
/// Unsharing requires `CAP_SYS_ADMIN`; without it such commands fail to spawn.
#[derive(Debug, Clone)]
pub struct NamespaceSandbox {
    limits: ProcessLimits,
}

impl NamespaceSandbox {
    pub fn new(limits: ProcessLimits) -> Self {
        Self { limits }
    }
}

impl Sandbox for NamespaceSandbox {
    fn name(&self) -> &'static str {
        "linux-namespace"
    }

    fn prepare_network(
        &self,
        dns: Option<&DnsConfig>,
        hosts: Option<&Path>,
    ) -> Result<Option<NetworkOverride>> {
        NetworkOverride::prepare(dns, hosts)
    }

    fn run(
        &self,
        cmd: &SandboxCommand<'_>,
        token: &CancellationToken,
    ) -> std::result::Result<CommandOutput, GitCommandError> {
        let mut command = base_command(cmd);
        install_pre_exec(&mut command, cmd.network).map_err(|source| GitCommandError::Spawn {
            args: cmd.display_args.to_string(),
            source,
        })?;
        run_to_completion(command, cmd.display_args, token, self.limits)
    }
}

fn install_pre_exec(command: &mut Command, network: Option<&NetworkOverride>) -> io::Result<()> {
    let mounts = match network {
        Some(network) => network
            .bind_mounts()
            .into_iter()
            .map(|(source, target)| Ok((path_cstring(source)?, CString::new(target)?)))
            .collect::<io::Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let root = CString::new("/")?;

    // SAFETY: the closure runs in the forked child before exec and only calls
    // async-signal-safe syscalls on data allocated before the fork.
    unsafe {
        command.pre_exec(move || {
            libc::umask(0o022);
            if mounts.is_empty() {
                return Ok(());
            }
            if libc::unshare(libc::CLONE_NEWNS | libc::CLONE_FS) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::mount(
                ptr::null(),
                root.as_ptr(),
                ptr::null(),
                libc::MS_REC | libc::MS_PRIVATE,
                ptr::null(),
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
            for (source, target) in &mounts {
                if libc::mount(
                    source.as_ptr(),
                    target.as_ptr(),
                    ptr::null(),
                    libc::MS_BIND,
                    ptr::null(),
                ) != 0
                {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
    Ok(())
}

fn path_cstring(path: &Path) -> io::Result<CString> {
    Ok(CString::new(path.as_os_str().as_bytes())?)
}
