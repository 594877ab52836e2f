//! Resolving a ref to a commit and a cache key without fetching.

use super::GitSourceHandler;
use crate::cancellation::CancellationToken;
use crate::errors::{Error, Result};
use crate::git::{is_commit_sha, parse_default_branch, redact_credentials, select_ref_sha, GitCli};

/// The result of `GitSourceHandler::cache_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInfo {
    /// `sha[.git][:subdir]`, stable for a given commit.
    pub key: String,
    /// The resolved 40-character commit SHA.
    pub pin: String,
    /// Whether the key is final. Always true for git sources.
    pub done: bool,
}

impl GitSourceHandler {
    /// Resolves the identifier's ref through `ls-remote` and derives the cache key.
    ///
    /// A ref that already is a commit SHA is used as is, without any git
    /// command.
    #[tracing::instrument(skip_all, fields(id = %self.id))]
    pub fn cache_key(&self, token: &CancellationToken) -> Result<CacheKeyInfo> {
        token.check()?;
        if is_commit_sha(&self.id.git_ref) {
            let key = self.sha_to_cache_key(&self.id.git_ref);
            self.remember_cache_key(&key);
            return Ok(CacheKeyInfo {
                key,
                pin: self.id.git_ref.clone(),
                done: true,
            });
        }

        let remote = &self.id.remote;
        let _remote_lock = self.source.locker.lock(remote);

        let auth_args = self.auth_args();
        let mirror = self.source.mount_remote(token, remote, &auth_args)?;
        let env = self.git_env(mirror.path(), auth_args)?;

        let git_ref = self.resolve_ref(token, &env.git)?;
        let peeled = format!("{}^{{}}", git_ref);
        let output = env
            .git
            .run_text(token, &["ls-remote", "origin", git_ref.as_str(), peeled.as_str()])
            .map_err(|e| Error::fetch_failed(remote, e))?;

        let sha = select_ref_sha(&output, &git_ref).ok_or_else(|| Error::RefNotFound {
            remote: redact_credentials(remote),
            reference: git_ref.clone(),
            output: redact_credentials(&output),
        })?;
        if !is_commit_sha(&sha) {
            return Err(Error::InvalidCommitSha(sha));
        }

        let key = self.sha_to_cache_key(&sha);
        log::debug!("Resolved {} to {} (key {})", self.id, sha, key);
        self.remember_cache_key(&key);
        Ok(CacheKeyInfo {
            key,
            pin: sha,
            done: true,
        })
    }

    /// The identifier's ref, or the remote's default branch when it is empty.
    pub(crate) fn resolve_ref(&self, token: &CancellationToken, git: &GitCli) -> Result<String> {
        if !self.id.git_ref.is_empty() {
            return Ok(self.id.git_ref.clone());
        }
        let remote = &self.id.remote;
        let output = git
            .run_text(token, &["ls-remote", "--symref", remote.as_str(), "HEAD"])
            .map_err(|e| {
                Error::git(
                    format!(
                        "error fetching default branch for repository {}",
                        redact_credentials(remote)
                    ),
                    e,
                )
            })?;
        parse_default_branch(&output).ok_or_else(|| Error::RefNotFound {
            remote: redact_credentials(remote),
            reference: "HEAD".to_string(),
            output: redact_credentials(&output),
        })
    }
}
