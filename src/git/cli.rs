//! The sandboxed `git` command line.

use super::url::redact_credentials;
use crate::cancellation::CancellationToken;
use crate::errors::GitCommandError;
use crate::sandbox::{NetworkOverride, Sandbox, SandboxCommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for building a `GitCli`.
#[derive(Debug, Clone, Default)]
pub struct GitCliOptions {
    pub git_dir: Option<PathBuf>,
    pub work_tree: Option<PathBuf>,
    /// Agent socket exported as `SSH_AUTH_SOCK`.
    pub ssh_auth_sock: Option<PathBuf>,
    /// File passed to ssh as `UserKnownHostsFile`.
    pub known_hosts: Option<PathBuf>,
    /// Extra `-c` flags (HTTP auth headers), placed before every subcommand.
    pub auth_args: Vec<String>,
}

/// A `git` invocation context: which repository, which credentials and which
/// sandbox to run in.
///
/// Every command gets `-c protocol.file.allow=user`, so submodules cannot pull
/// in local repositories, and runs with a fresh environment that ignores
/// system and user git config.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    opts: GitCliOptions,
    sandbox: Arc<dyn Sandbox>,
    network: Option<Arc<NetworkOverride>>,
}

impl GitCli {
    pub fn new(
        binary: impl Into<PathBuf>,
        opts: GitCliOptions,
        sandbox: Arc<dyn Sandbox>,
        network: Option<NetworkOverride>,
    ) -> Self {
        Self {
            binary: binary.into(),
            opts,
            sandbox,
            network: network.map(Arc::new),
        }
    }

    /// A copy of this CLI pointed at a different git dir and work tree.
    /// Credentials and the network override are shared.
    pub fn within_dir(&self, git_dir: Option<&Path>, work_tree: Option<&Path>) -> Self {
        let mut cli = self.clone();
        cli.opts.git_dir = git_dir.map(Path::to_path_buf);
        cli.opts.work_tree = work_tree.map(Path::to_path_buf);
        cli
    }

    pub fn git_dir(&self) -> Option<&Path> {
        self.opts.git_dir.as_deref()
    }

    /// Runs `git <args>` and returns its stdout.
    ///
    /// When a command fails and stderr mentions `--depth` or `shallow`, it is
    /// retried once without any `--depth` flags, for servers that refuse
    /// shallow fetches.
    pub fn run<S: AsRef<str>>(
        &self,
        token: &CancellationToken,
        args: &[S],
    ) -> Result<Vec<u8>, GitCommandError> {
        let mut args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let mut retried = false;
        loop {
            let display = redact_credentials(&args.join(" "));
            let full_args = self.full_args(&args);
            let env = self.environment();
            let cmd = SandboxCommand {
                program: &self.binary,
                args: &full_args,
                env: &env,
                current_dir: self.current_dir(),
                network: self.network.as_deref(),
                display_args: &display,
            };
            log::debug!("Running git {} (sandbox: {})", display, self.sandbox.name());

            let output = self.sandbox.run(&cmd, token)?;
            if output.status.success() {
                return Ok(output.stdout);
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            if !retried && (stderr.contains("--depth") || stderr.contains("shallow")) {
                let stripped = strip_depth_args(&args);
                if stripped.len() != args.len() {
                    log::warn!("git {} rejected a shallow operation, retrying without --depth", display);
                    args = stripped;
                    retried = true;
                    continue;
                }
            }

            return Err(GitCommandError::Failed {
                args: display,
                status: output.status.to_string(),
                stderr: redact_credentials(stderr.trim()),
            });
        }
    }

    /// Like `run`, but returns stdout as a trimmed string.
    pub fn run_text<S: AsRef<str>>(
        &self,
        token: &CancellationToken,
        args: &[S],
    ) -> Result<String, GitCommandError> {
        let out = self.run(token, args)?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = vec!["-c".to_string(), "protocol.file.allow=user".to_string()];
        full.extend(self.opts.auth_args.iter().cloned());
        if let Some(dir) = &self.opts.git_dir {
            full.push(format!("--git-dir={}", dir.display()));
        }
        if let Some(tree) = &self.opts.work_tree {
            full.push(format!("--work-tree={}", tree.display()));
        }
        full.extend(args.iter().cloned());
        full
    }

    fn current_dir(&self) -> Option<&Path> {
        self.opts
            .work_tree
            .as_deref()
            .or(self.opts.git_dir.as_deref())
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "PATH".to_string(),
                std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into()),
            ),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            (
                "GIT_SSH_COMMAND".to_string(),
                git_ssh_command(self.opts.known_hosts.as_deref()),
            ),
            ("GIT_CONFIG_NOSYSTEM".to_string(), "1".to_string()),
            ("HOME".to_string(), "/dev/null".to_string()),
            ("LC_ALL".to_string(), "C".to_string()),
        ];
        if let Some(sock) = &self.opts.ssh_auth_sock {
            env.push(("SSH_AUTH_SOCK".to_string(), sock.display().to_string()));
        }
        env
    }
}

/// The ssh command git uses for `ssh://` and scp-like remotes.
///
/// ```
/// use gitsnap::git::git_ssh_command;
/// use std::path::Path;
///
/// assert_eq!(git_ssh_command(None), "ssh -F /dev/null -o StrictHostKeyChecking=no");
/// assert_eq!(
///     git_ssh_command(Some(Path::new("/tmp/known_hosts"))),
///     "ssh -F /dev/null -o UserKnownHostsFile=/tmp/known_hosts"
/// );
/// ```
pub fn git_ssh_command(known_hosts: Option<&Path>) -> String {
    match known_hosts {
        Some(path) => format!("ssh -F /dev/null -o UserKnownHostsFile={}", path.display()),
        None => "ssh -F /dev/null -o StrictHostKeyChecking=no".to_string(),
    }
}

fn strip_depth_args(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| !a.starts_with("--depth"))
        .cloned()
        .collect()
}
