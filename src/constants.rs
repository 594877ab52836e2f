// src/constants.rs

use std::time::Duration;

/// Metadata key holding the remote URL of a mirror ref.
pub const KEY_GIT_REMOTE: &str = "git-remote";
/// Index prefix under which mirror refs are searchable (`git-remote::<url>`).
pub const INDEX_GIT_REMOTE: &str = "git-remote::";

/// Metadata key holding `cacheKey:subdir` of a snapshot ref.
pub const KEY_GIT_SNAPSHOT: &str = "git-snapshot";
/// Index prefix under which snapshot refs are searchable.
pub const INDEX_GIT_SNAPSHOT: &str = "git-snapshot::";

/// Time between SIGTERM and SIGKILL when a git process group is cancelled.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// How often a waiting subprocess is polled for exit and cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Secret name used for token auth when the identifier does not name one.
pub const DEFAULT_AUTH_TOKEN_SECRET: &str = "GIT_AUTH_TOKEN";
/// Secret name used for header auth when the identifier does not name one.
pub const DEFAULT_AUTH_HEADER_SECRET: &str = "GIT_AUTH_HEADER";

/// SSH id used when known hosts are given but no socket id is.
pub const DEFAULT_SSH_ID: &str = "default";

/// Suffix appended to hashed client ids to form DNS search domains.
pub const CLIENT_DOMAIN_SUFFIX: &str = ".gitsnap.local";

/// Namespace for temporary refs pinning a commit inside a mirror.
pub const PIN_REF_NAMESPACE: &str = "refs/gitsnap";

/// Remote URL prefixes whose auth scope is widened to the prefix itself.
pub const GITHUB_SCOPE_PREFIXES: [&str; 2] = ["https://github.com/", "https://www.github.com/"];

/// Environment variable overriding the default cache directory.
pub const CACHE_DIR_ENV: &str = "GITSNAP_CACHE_DIR";
