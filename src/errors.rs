//! Defines the error types returned by the git source provider.
//!
//! `Error` is the library-level taxonomy. `GitCommandError` describes a single
//! failed `git` invocation and is wrapped by the variants that name which step
//! of a resolution failed. Both are built so that any remote URL or git stderr
//! they carry has already passed through credential redaction.

use crate::cache::CacheError;
use crate::git::redact_credentials;
use crate::session::SessionError;
use thiserror::Error;

/// Errors produced while resolving a git identifier into a cache key or snapshot.
#[derive(Error, Debug)]
pub enum Error {
    // --- Input Errors ---
    /// The identifier could not be parsed into a remote, ref and subdir.
    #[error("invalid git identifier '{input}': {reason}")]
    InvalidIdentifier {
        /// The (redacted) input that failed to parse.
        input: String,
        /// Human-readable reason.
        reason: String,
    },

    // --- Resolution Errors ---
    /// `ls-remote` did not list the requested ref.
    #[error("repository {remote} does not contain ref {reference}, output: {output:?}")]
    RefNotFound {
        remote: String,
        reference: String,
        output: String,
    },

    /// The ref resolved to something that is not a full commit SHA.
    #[error("invalid commit sha {0:?}")]
    InvalidCommitSha(String),

    /// An SSH agent socket was requested but the caller did not forward it.
    #[error("no SSH key {id:?} forwarded from the client")]
    AuthRequired { id: String },

    // --- Git Step Errors ---
    /// Fetching from the remote into the mirror failed.
    #[error("failed to fetch remote {remote}: {source}")]
    FetchFailed {
        remote: String,
        #[source]
        source: GitCommandError,
    },

    /// Checking the ref out into the snapshot directory failed.
    #[error("failed to checkout remote {remote}: {source}")]
    CheckoutFailed {
        remote: String,
        #[source]
        source: GitCommandError,
    },

    /// `git submodule update` failed on the checked-out tree.
    #[error("failed to update submodules for {remote}: {source}")]
    SubmoduleFailed {
        remote: String,
        #[source]
        source: GitCommandError,
    },

    /// Any other git step failed.
    #[error("{context}: {source}")]
    Git {
        context: String,
        #[source]
        source: GitCommandError,
    },

    // --- Platform Errors ---
    /// A network override was requested on a platform that cannot apply it.
    #[error("network override (custom DNS or hosts file) is not supported on {platform}")]
    UnsupportedPlatform { platform: &'static str },

    // --- Collaborator Errors ---
    /// The cache accessor reported an error.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The session/secret provider reported an error.
    #[error(transparent)]
    Session(#[from] SessionError),

    // --- I/O Errors ---
    /// Error occurring during file or directory access.
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // --- Signal Handling ---
    /// The operation was cancelled through its `CancellationToken`.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wraps a failed git invocation with a description of the step.
    pub fn git(context: impl Into<String>, source: GitCommandError) -> Self {
        match source {
            GitCommandError::Cancelled { .. } => Error::Cancelled,
            source => Error::Git {
                context: context.into(),
                source,
            },
        }
    }

    /// `FetchFailed` for `remote` (redacted here), or `Cancelled`.
    pub fn fetch_failed(remote: &str, source: GitCommandError) -> Self {
        match source {
            GitCommandError::Cancelled { .. } => Error::Cancelled,
            source => Error::FetchFailed {
                remote: redact_credentials(remote),
                source,
            },
        }
    }

    pub fn checkout_failed(remote: &str, source: GitCommandError) -> Self {
        match source {
            GitCommandError::Cancelled { .. } => Error::Cancelled,
            source => Error::CheckoutFailed {
                remote: redact_credentials(remote),
                source,
            },
        }
    }

    pub fn submodule_failed(remote: &str, source: GitCommandError) -> Self {
        match source {
            GitCommandError::Cancelled { .. } => Error::Cancelled,
            source => Error::SubmoduleFailed {
                remote: redact_credentials(remote),
                source,
            },
        }
    }

    /// Returns true if this error was caused by cancellation, directly or via a git command.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::FetchFailed { source, .. }
            | Error::CheckoutFailed { source, .. }
            | Error::SubmoduleFailed { source, .. }
            | Error::Git { source, .. } => matches!(source, GitCommandError::Cancelled { .. }),
            _ => false,
        }
    }
}

/// A single failed `git` invocation.
///
/// `args` holds only the subcommand arguments the caller asked for, never the
/// injected `-c http.*.extraheader` auth flags, and is already redacted.
#[derive(Error, Debug)]
pub enum GitCommandError {
    #[error("failed to spawn git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args} failed ({status}): {stderr}")]
    Failed {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("git {args} was cancelled")]
    Cancelled { args: String },

    /// Waiting on or collecting output from the child failed.
    #[error("failed to wait for git {args}: {source}")]
    Wait {
        args: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper function to create an `Error::Io` with path context.
pub fn io_error_with_path<P: AsRef<std::path::Path>>(source: std::io::Error, path: P) -> Error {
    Error::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}
