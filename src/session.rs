//! The secret/session provider contract consumed by the git source.
//!
//! A session resolves named secrets (auth tokens, auth headers) and SSH agent
//! sockets forwarded by the caller. `StaticSession` is an in-memory provider
//! used by the binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by a session provider.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("secret {0:?} not found")]
    SecretNotFound(String),

    /// The caller does not forward SSH agents at all.
    #[error("SSH agent forwarding is not available in this session")]
    Unimplemented,

    #[error("SSH key {0:?} not found in session")]
    SshKeyNotFound(String),

    #[error("session provider error: {0}")]
    Provider(String),

    #[error("session I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Ownership and mode for a mounted agent socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// A mounted SSH agent socket. Runs its cleanup when dropped.
pub struct SshSocket {
    path: PathBuf,
    cleanup: Option<Box<dyn FnOnce() -> std::io::Result<()> + Send>>,
}

impl SshSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cleanup: None,
        }
    }

    pub fn on_cleanup(mut self, cleanup: impl FnOnce() -> std::io::Result<()> + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SshSocket {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if let Err(e) = cleanup() {
                log::warn!("Failed to clean up SSH socket {}: {}", self.path.display(), e);
            }
        }
    }
}

impl fmt::Debug for SshSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSocket").field("path", &self.path).finish()
    }
}

/// Resolves secrets and SSH sockets on behalf of the calling session.
pub trait SessionProvider: Send + Sync + fmt::Debug {
    /// The raw bytes of secret `name`, or `SessionError::SecretNotFound`.
    fn get_secret(&self, name: &str) -> Result<Vec<u8>, SessionError>;

    /// Verifies that SSH key `id` is forwarded, without mounting it.
    fn check_ssh_id(&self, id: &str) -> Result<(), SessionError>;

    /// Exposes the agent socket for key `id` with the given ownership.
    fn mount_ssh_socket(&self, id: &str, opts: SocketOptions) -> Result<SshSocket, SessionError>;
}

/// In-memory secrets and pre-existing agent sockets.
#[derive(Default, Clone)]
pub struct StaticSession {
    secrets: HashMap<String, Vec<u8>>,
    ssh_sockets: HashMap<String, PathBuf>,
}

impl StaticSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    pub fn with_ssh_socket(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.ssh_sockets.insert(id.into(), path.into());
        self
    }
}

// Secret values stay out of logs.
impl fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.secrets.keys().collect();
        names.sort();
        f.debug_struct("StaticSession")
            .field("secrets", &names)
            .field("ssh_sockets", &self.ssh_sockets)
            .finish()
    }
}

impl SessionProvider for StaticSession {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>, SessionError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::SecretNotFound(name.to_string()))
    }

    fn check_ssh_id(&self, id: &str) -> Result<(), SessionError> {
        if self.ssh_sockets.is_empty() {
            return Err(SessionError::Unimplemented);
        }
        if !self.ssh_sockets.contains_key(id) {
            return Err(SessionError::SshKeyNotFound(id.to_string()));
        }
        Ok(())
    }

    fn mount_ssh_socket(&self, id: &str, opts: SocketOptions) -> Result<SshSocket, SessionError> {
        self.check_ssh_id(id)?;
        let path = &self.ssh_sockets[id];
        log::debug!(
            "Using SSH socket {} for key {:?} (uid {}, gid {}, mode {:o})",
            path.display(),
            id,
            opts.uid,
            opts.gid,
            opts.mode
        );
        Ok(SshSocket::new(path.clone()))
    }
}

/// Uid and gid of the current process (0/0 where the notion does not exist).
pub fn current_ids() -> (u32, u32) {
    #[cfg(unix)]
    {
        // SAFETY: getuid/getgid cannot fail and have no side effects.
        unsafe { (libc::getuid(), libc::getgid()) }
    }
    #[cfg(not(unix))]
    {
        (0, 0)
    }
}
