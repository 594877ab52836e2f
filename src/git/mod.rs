// src/git/mod.rs
//! Git-level building blocks used by the source provider.
//!
//! This module provides functionality to:
//! - Parse `remote#ref:subdir` identifiers and redact credentials out of URLs and messages.
//! - Run the `git` binary through a sandbox with a sanitized environment.
//! - Interpret `ls-remote` output (default branch, ref disambiguation, commit SHAs).

mod cli;
mod refs;
mod url;

pub use cli::{git_ssh_command, GitCli, GitCliOptions};
pub use refs::{is_commit_sha, parse_default_branch, select_ref_sha};
pub use url::{is_git_transport, parse_identifier, redact_credentials, remote_host, ParsedGitUrl};
