//! Spawning, waiting on and terminating sandboxed children.

use super::{CommandOutput, ProcessLimits, SandboxCommand};
use crate::cancellation::CancellationToken;
use crate::errors::GitCommandError;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
#[cfg(unix)]
use std::time::Instant;

/// Builds a `Command` with a cleared environment, null stdin, captured output
/// and (on unix) its own process group.
pub(super) fn base_command(cmd: &SandboxCommand<'_>) -> Command {
    let mut command = Command::new(cmd.program);
    command
        .args(cmd.args)
        .env_clear()
        .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cmd.current_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

/// Spawns `command` and waits for it, terminating its process group if
/// `token` is cancelled first.
pub(super) fn run_to_completion(
    mut command: Command,
    display_args: &str,
    token: &CancellationToken,
    limits: ProcessLimits,
) -> Result<CommandOutput, GitCommandError> {
    let cancelled = || GitCommandError::Cancelled {
        args: display_args.to_string(),
    };
    let wait_error = |source: io::Error| GitCommandError::Wait {
        args: display_args.to_string(),
        source,
    };

    if token.is_cancelled() {
        return Err(cancelled());
    }

    let mut child = command.spawn().map_err(|source| GitCommandError::Spawn {
        args: display_args.to_string(),
        source,
    })?;
    log::trace!("Spawned git {} as pid {}", display_args, child.id());

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait().map_err(wait_error)? {
            break status;
        }
        if token.is_cancelled() {
            let status = terminate(&mut child, display_args, limits).map_err(wait_error)?;
            log::debug!("git {} terminated after cancellation ({})", display_args, status);
            discard(stdout, "stdout", display_args);
            discard(stderr, "stderr", display_args);
            return Err(cancelled());
        }
        thread::sleep(limits.poll_interval);
    };

    Ok(CommandOutput {
        status,
        stdout: collect(stdout).map_err(wait_error)?,
        stderr: collect(stderr).map_err(wait_error)?,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<Vec<u8>>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output reader thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// Joins a reader whose output is no longer needed.
fn discard(handle: Option<JoinHandle<io::Result<Vec<u8>>>>, stream: &str, display_args: &str) {
    if let Err(e) = collect(handle) {
        log::debug!("Dropped {} of cancelled git {}: {}", stream, display_args, e);
    }
}

/// SIGTERM to the process group, then SIGKILL once `kill_grace` has passed.
#[cfg(unix)]
fn terminate(child: &mut Child, display_args: &str, limits: ProcessLimits) -> io::Result<ExitStatus> {
    let pgid = child.id() as libc::pid_t;
    signal_group(pgid, libc::SIGTERM);

    let deadline = Instant::now() + limits.kill_grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        thread::sleep(limits.poll_interval);
    }

    log::warn!(
        "git {} did not exit within {:?} of SIGTERM, sending SIGKILL",
        display_args,
        limits.kill_grace
    );
    signal_group(pgid, libc::SIGKILL);
    child.wait()
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, display_args: &str, limits: ProcessLimits) -> io::Result<ExitStatus> {
    log::debug!(
        "Killing git {} (no process groups on this platform, grace {:?} unused)",
        display_args,
        limits.kill_grace
    );
    child.kill()?;
    child.wait()
}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: kill(2) with a negative pid signals every process in the group.
    // The group was created for this child by `process_group(0)`.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        log::debug!(
            "Signal {} to process group {} failed: {}",
            signal,
            pgid,
            io::Error::last_os_error()
        );
    }
}
