// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Resolve a git remote into a cached, content-addressed snapshot.
///
/// gitsnap resolves `remote#ref:subdir` to a commit with `git ls-remote`,
/// derives a stable cache key from it, and (unless --key-only is given) checks
/// the commit out into a local cache, reusing a per-remote bare mirror and any
/// snapshot already built for the same key. All git commands run with a
/// sanitized environment and are cancelled as a process group on Ctrl+C.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Git identifier, e.g. `github.com/user/repo.git#v1.2.3:docs` or `git@host:repo.git`.
    pub identifier: String,

    // --- Resolution Options ---
    /// Branch, tag, ref or commit to resolve (overrides the `#ref` fragment).
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    /// Subdirectory of the repository to snapshot (overrides the `:subdir` fragment).
    #[arg(long, value_name = "PATH")]
    pub subdir: Option<String>,

    /// Keep the `.git` directory in the snapshot.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub keep_git_dir: bool,

    /// Only resolve and print the cache key and pinned commit; do not fetch.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub key_only: bool,

    /// Print only the snapshot directory.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "key_only")]
    pub output_path: bool,

    // --- Cache Options ---
    /// Directory for the local ref cache (default: $GITSNAP_CACHE_DIR or the platform cache dir).
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// The git executable to run.
    #[arg(long, value_name = "PATH")]
    pub git_binary: Option<PathBuf>,

    // --- Network Options ---
    /// Nameserver to put first in the sandboxed resolv.conf (repeatable).
    #[arg(long = "nameserver", value_name = "IP")]
    pub nameservers: Vec<String>,

    /// Search domain to put first in the sandboxed resolv.conf (repeatable).
    #[arg(long = "search-domain", value_name = "DOMAIN")]
    pub search_domains: Vec<String>,

    /// resolv.conf option, e.g. `ndots:2` (repeatable).
    #[arg(long = "dns-option", value_name = "OPT")]
    pub dns_options: Vec<String>,

    /// File to bind-mount over /etc/hosts for git commands.
    #[arg(long, value_name = "FILE")]
    pub hosts_file: Option<PathBuf>,

    /// Client id whose search domain is added to the resolver (repeatable).
    #[arg(long = "client-id", value_name = "ID")]
    pub client_ids: Vec<String>,

    // --- Auth Options ---
    /// Name of the secret holding an auth token.
    #[arg(long, value_name = "NAME")]
    pub auth_token_secret: Option<String>,

    /// Name of the secret holding a full Authorization header value.
    #[arg(long, value_name = "NAME")]
    pub auth_header_secret: Option<String>,

    /// Load secret NAME from environment variable ENV (repeatable).
    #[arg(long = "secret", value_name = "NAME=ENV", value_parser = parse_key_value)]
    pub secrets: Vec<(String, String)>,

    /// Register an SSH agent socket under an id (repeatable).
    #[arg(long = "ssh-sock", value_name = "ID=PATH", value_parser = parse_key_value)]
    pub ssh_sockets: Vec<(String, String)>,

    /// Forward the SSH agent socket with this id to git.
    #[arg(long, value_name = "ID")]
    pub mount_ssh_sock: Option<String>,

    /// known_hosts file used for ssh remotes.
    #[arg(long, value_name = "FILE")]
    pub known_hosts: Option<PathBuf>,

    // --- Process Options ---
    /// Seconds to wait after SIGTERM before killing a cancelled git process group.
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub kill_grace: u64,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() && !v.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}
