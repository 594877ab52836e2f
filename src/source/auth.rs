//! Credentials for git commands: HTTP auth headers, SSH agent sockets and
//! known_hosts files.

use super::identifier::GitIdentifier;
use crate::constants::GITHUB_SCOPE_PREFIXES;
use crate::errors::{io_error_with_path, Error, Result};
use crate::git::remote_host;
use crate::sandbox::{client_domain, DnsConfig};
use crate::session::{current_ids, SessionError, SessionProvider, SocketOptions, SshSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthSecret {
    pub name: String,
    /// A token is wrapped into a basic auth header; a header is used verbatim.
    pub token: bool,
}

/// Secret names to try, most specific first.
///
/// Remotes without a parseable host (scp-style) get no candidates.
pub(crate) fn auth_secret_names(id: &GitIdentifier) -> Vec<AuthSecret> {
    let Some(host) = remote_host(&id.remote) else {
        return Vec::new();
    };
    let header = &id.auth_header_secret;
    let token = &id.auth_token_secret;

    let mut names = Vec::with_capacity(4);
    if !header.is_empty() {
        names.push(AuthSecret {
            name: format!("{}.{}", header, host),
            token: false,
        });
    }
    if !token.is_empty() {
        names.push(AuthSecret {
            name: format!("{}.{}", token, host),
            token: true,
        });
    }
    if !header.is_empty() {
        names.push(AuthSecret {
            name: header.clone(),
            token: false,
        });
    }
    if !token.is_empty() {
        names.push(AuthSecret {
            name: token.clone(),
            token: true,
        });
    }
    names
}

/// The URL prefix an auth header applies to.
///
/// GitHub remotes share one scope, so a single token covers every GitHub
/// repository fetched in a session.
///
/// ```
/// use gitsnap::source::token_scope;
///
/// assert_eq!(token_scope("https://github.com/a/b.git"), "https://github.com/");
/// assert_eq!(token_scope("https://gitlab.com/a/b.git"), "https://gitlab.com/a/b.git");
/// ```
pub fn token_scope(remote: &str) -> &str {
    GITHUB_SCOPE_PREFIXES
        .iter()
        .find(|prefix| remote.starts_with(*prefix))
        .copied()
        .unwrap_or(remote)
}

/// Looks up the first available auth secret and turns it into `-c` flags.
///
/// Returns `Ok(vec![])` when no candidate exists, and an error only when the
/// provider itself fails.
pub(crate) fn resolve_auth_args(
    id: &GitIdentifier,
    session: &dyn SessionProvider,
) -> std::result::Result<Vec<String>, SessionError> {
    for secret in auth_secret_names(id) {
        let value = match session.get_secret(&secret.name) {
            Ok(value) => value,
            Err(SessionError::SecretNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let header = if secret.token {
            let mut creds = b"x-access-token:".to_vec();
            creds.extend_from_slice(&value);
            format!("basic {}", BASE64.encode(creds))
        } else {
            String::from_utf8_lossy(&value).into_owned()
        };
        log::debug!("Using auth secret {:?} for {}", secret.name, id.redacted_remote());
        return Ok(vec![
            "-c".to_string(),
            format!(
                "http.{}.extraheader=Authorization: {}",
                token_scope(&id.remote),
                header
            ),
        ]);
    }
    Ok(Vec::new())
}

/// Exposes the caller's SSH agent socket `ssh_id` to git.
pub(crate) fn mount_ssh_auth_sock(
    session: Option<&dyn SessionProvider>,
    ssh_id: &str,
) -> Result<SshSocket> {
    let auth_required = || Error::AuthRequired {
        id: ssh_id.to_string(),
    };
    let session = session.ok_or_else(auth_required)?;
    match session.check_ssh_id(ssh_id) {
        Ok(()) => {}
        Err(SessionError::Unimplemented) | Err(SessionError::SshKeyNotFound(_)) => {
            return Err(auth_required())
        }
        Err(e) => return Err(e.into()),
    }

    let (uid, gid) = current_ids();
    let opts = SocketOptions {
        uid,
        gid,
        mode: 0o700,
    };
    Ok(session.mount_ssh_socket(ssh_id, opts)?)
}

/// Writes `known_hosts` to a temp file that lives as long as the returned handle.
pub(crate) fn mount_known_hosts(known_hosts: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("known_hosts")
        .tempfile()
        .map_err(|e| io_error_with_path(e, std::env::temp_dir()))?;
    file.write_all(known_hosts.as_bytes())
        .map_err(|e| io_error_with_path(e, file.path()))?;
    file.flush().map_err(|e| io_error_with_path(e, file.path()))?;
    Ok(file)
}

/// The DNS override for one identifier: the base config with the search
/// domains of its client ids in front.
pub(crate) fn dns_config(base: Option<&DnsConfig>, client_ids: &[String]) -> Option<DnsConfig> {
    let base = base?;
    let mut search_domains: Vec<String> = client_ids.iter().map(|id| client_domain(id)).collect();
    search_domains.extend(base.search_domains.iter().cloned());
    Some(DnsConfig {
        search_domains,
        ..base.clone()
    })
}
