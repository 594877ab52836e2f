//! The git source provider.
//!
//! `GitSource` is constructed once per process and owns the shared pieces: the
//! cache accessor, the keyed locker and the sandbox. `GitSource::resolve`
//! binds one `GitIdentifier` and the caller's session into a
//! `GitSourceHandler`, which answers `cache_key` (a cheap `ls-remote`) and
//! `snapshot` (fetch and checkout into an immutable cache ref).

mod auth;
mod cache_key;
mod identifier;
mod metadata;
mod remote;
mod snapshot;

use crate::cache::CacheAccessor;
use crate::config::SourceConfig;
use crate::errors::Result;
use crate::git::{GitCli, GitCliOptions};
use crate::locker::KeyedLocker;
use crate::sandbox::{default_sandbox, DnsConfig, Sandbox};
use crate::session::{SessionProvider, SshSocket};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;

pub use auth::token_scope;
pub use cache_key::CacheKeyInfo;
pub use identifier::{
    GitIdentifier, ATTR_AUTH_HEADER_SECRET, ATTR_AUTH_TOKEN_SECRET, ATTR_CLIENT_IDS,
    ATTR_KEEP_GIT_DIR, ATTR_KNOWN_SSH_HOSTS, ATTR_MOUNT_SSH_SOCK,
};
pub use remote::RemoteMirror;

/// Resolves git identifiers into cache keys and snapshots.
///
/// Cheap to clone; clones share the cache, the locker and the sandbox.
#[derive(Debug, Clone)]
pub struct GitSource {
    cache: Arc<dyn CacheAccessor>,
    locker: Arc<KeyedLocker>,
    config: Arc<SourceConfig>,
    sandbox: Arc<dyn Sandbox>,
}

impl GitSource {
    /// A source with its own locker and the platform's default sandbox.
    pub fn new(cache: Arc<dyn CacheAccessor>, config: SourceConfig) -> Self {
        let sandbox = default_sandbox(config.limits);
        Self {
            cache,
            locker: Arc::new(KeyedLocker::new()),
            config: Arc::new(config),
            sandbox,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Shares `locker` with other sources using the same cache.
    pub fn with_locker(mut self, locker: Arc<KeyedLocker>) -> Self {
        self.locker = locker;
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheAccessor> {
        &self.cache
    }

    /// Parses an identifier string together with its `git.*` attributes.
    pub fn identifier(
        &self,
        input: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<GitIdentifier> {
        GitIdentifier::from_attrs(input, attrs)
    }

    /// Binds `id` and the caller's session into a handler.
    pub fn resolve(
        &self,
        id: GitIdentifier,
        session: Option<Arc<dyn SessionProvider>>,
    ) -> GitSourceHandler {
        GitSourceHandler {
            source: self.clone(),
            id,
            session,
            cache_key: Mutex::new(None),
            auth: Mutex::new(None),
        }
    }

    /// A git CLI in this source's sandbox, with the network override for `dns`
    /// and the configured hosts file.
    pub(crate) fn git_cli(&self, opts: GitCliOptions, dns: Option<&DnsConfig>) -> Result<GitCli> {
        let network = self
            .sandbox
            .prepare_network(dns, self.config.hosts_file.as_deref())?;
        Ok(GitCli::new(
            &self.config.git_binary,
            opts,
            Arc::clone(&self.sandbox),
            network,
        ))
    }

    /// A git CLI for commands that never touch the network.
    pub(crate) fn local_git_cli(&self, opts: GitCliOptions) -> GitCli {
        GitCli::new(&self.config.git_binary, opts, Arc::clone(&self.sandbox), None)
    }
}

/// One identifier being resolved for one session.
pub struct GitSourceHandler {
    source: GitSource,
    id: GitIdentifier,
    session: Option<Arc<dyn SessionProvider>>,
    cache_key: Mutex<Option<String>>,
    /// `None` until a lookup succeeded; `Some(vec![])` means no secret exists.
    auth: Mutex<Option<Vec<String>>>,
}

impl fmt::Debug for GitSourceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitSourceHandler")
            .field("id", &self.id)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

/// A git CLI bound to a directory plus the credentials it needs.
///
/// The socket and known_hosts file stay alive as long as the CLI does.
pub(crate) struct GitEnv {
    pub git: GitCli,
    _known_hosts: Option<NamedTempFile>,
    _ssh_sock: Option<SshSocket>,
}

impl GitSourceHandler {
    pub fn identifier(&self) -> &GitIdentifier {
        &self.id
    }

    /// The `-c http.*.extraheader` flags for this remote.
    ///
    /// Looked up once and kept. A provider error is logged and not kept, so
    /// the next call asks again.
    pub(crate) fn auth_args(&self) -> Vec<String> {
        let mut auth = self.auth.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(args) = auth.as_ref() {
            return args.clone();
        }
        let Some(session) = self.session.as_deref() else {
            *auth = Some(Vec::new());
            return Vec::new();
        };
        match auth::resolve_auth_args(&self.id, session) {
            Ok(args) => {
                *auth = Some(args.clone());
                args
            }
            Err(e) => {
                log::warn!(
                    "Failed to look up auth secrets for {}: {}",
                    self.id.redacted_remote(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Key derived from a resolved commit: `sha[.git][:subdir]`.
    pub(crate) fn sha_to_cache_key(&self, sha: &str) -> String {
        let mut key = sha.to_string();
        if self.id.keep_git_dir {
            key.push_str(".git");
        }
        if !self.id.subdir.is_empty() {
            key.push(':');
            key.push_str(&self.id.subdir);
        }
        key
    }

    fn remember_cache_key(&self, key: &str) {
        *self.cache_key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key.to_string());
    }

    fn remembered_cache_key(&self) -> Option<String> {
        self.cache_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds the CLI for networked commands against the mirror at `git_dir`.
    pub(crate) fn git_env(&self, git_dir: &Path, auth_args: Vec<String>) -> Result<GitEnv> {
        let ssh_sock = if self.id.mount_ssh_sock.is_empty() {
            None
        } else {
            Some(auth::mount_ssh_auth_sock(
                self.session.as_deref(),
                &self.id.mount_ssh_sock,
            )?)
        };
        let known_hosts = if self.id.known_ssh_hosts.is_empty() {
            None
        } else {
            Some(auth::mount_known_hosts(&self.id.known_ssh_hosts)?)
        };

        let dns = auth::dns_config(self.source.config.dns.as_ref(), &self.id.client_ids);
        let opts = GitCliOptions {
            git_dir: Some(git_dir.to_path_buf()),
            work_tree: None,
            ssh_auth_sock: ssh_sock.as_ref().map(|s| s.path().to_path_buf()),
            known_hosts: known_hosts.as_ref().map(|f| f.path().to_path_buf()),
            auth_args,
        };
        let git = self.source.git_cli(opts, dns.as_ref())?;
        Ok(GitEnv {
            git,
            _known_hosts: known_hosts,
            _ssh_sock: ssh_sock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use crate::session::{SessionError, SocketOptions, StaticSession};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(dir: &Path) -> GitSource {
        let cache = LocalCache::open(dir).unwrap();
        GitSource::new(Arc::new(cache), SourceConfig::default_for_test(dir))
    }

    #[test]
    fn test_sha_to_cache_key() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let sha = "0123456789abcdef0123456789abcdef01234567";

        let plain = src.resolve(GitIdentifier::parse("github.com/a/b").unwrap(), None);
        assert_eq!(plain.sha_to_cache_key(sha), sha);

        let keep = src.resolve(
            GitIdentifier::parse("github.com/a/b").unwrap().keep_git_dir(true),
            None,
        );
        assert_eq!(keep.sha_to_cache_key(sha).len(), 44);

        let sub = src.resolve(GitIdentifier::parse("github.com/a/b#:docs").unwrap(), None);
        assert_eq!(sub.sha_to_cache_key(sha), format!("{}:docs", sha));
    }

    #[test]
    fn test_auth_args_without_session_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let handler = source(dir.path()).resolve(GitIdentifier::parse("github.com/a/b").unwrap(), None);
        assert!(handler.auth_args().is_empty());
        assert_eq!(*handler.auth.lock().unwrap(), Some(Vec::new()));
    }

    /// Fails the first lookup, then serves a token.
    #[derive(Debug, Default)]
    struct FlakySession {
        calls: AtomicUsize,
    }

    impl SessionProvider for FlakySession {
        fn get_secret(&self, name: &str) -> std::result::Result<Vec<u8>, SessionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SessionError::Provider("connection reset".into()));
            }
            if name == "GIT_AUTH_TOKEN" {
                Ok(b"tok".to_vec())
            } else {
                Err(SessionError::SecretNotFound(name.to_string()))
            }
        }

        fn check_ssh_id(&self, _id: &str) -> std::result::Result<(), SessionError> {
            Err(SessionError::Unimplemented)
        }

        fn mount_ssh_socket(
            &self,
            _id: &str,
            _opts: SocketOptions,
        ) -> std::result::Result<SshSocket, SessionError> {
            Err(SessionError::Unimplemented)
        }
    }

    #[test]
    fn test_auth_provider_error_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let handler = source(dir.path()).resolve(
            GitIdentifier::parse("https://example.com/r.git").unwrap(),
            Some(Arc::new(FlakySession::default())),
        );
        assert!(handler.auth_args().is_empty());
        assert!(handler.auth.lock().unwrap().is_none());

        let args = handler.auth_args();
        assert_eq!(args.len(), 2);
        assert!(args[1].starts_with("http.https://example.com/r.git.extraheader=Authorization: basic "));
        // Cached from now on.
        assert_eq!(handler.auth_args(), args);
    }

    #[test]
    fn test_git_env_requires_forwarded_ssh_key() {
        let dir = tempfile::tempdir().unwrap();
        let id = GitIdentifier::parse("git@github.com:user/repo.git")
            .unwrap()
            .with_mount_ssh_sock("default");
        let handler = source(dir.path()).resolve(id, Some(Arc::new(StaticSession::new())));
        let err = handler.git_env(dir.path(), Vec::new()).err().unwrap();
        assert!(matches!(err, crate::Error::AuthRequired { .. }));
    }
}
