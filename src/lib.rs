//! `gitsnap` is the git source provider of a build engine: it turns a git
//! remote, ref and optional subdirectory into an immutable, content-addressed
//! snapshot in a local ref cache.
//!
//! Resolution happens in two steps:
//! 1.  **Cache key**: `GitSourceHandler::cache_key` resolves the ref with a
//!     single `git ls-remote` and derives a stable key from the commit SHA.
//! 2.  **Snapshot**: `GitSourceHandler::snapshot` fetches into a per-remote
//!     bare mirror and checks the commit out into a new cache ref, unless a
//!     snapshot for the same key already exists.
//!
//! Every git command runs through a `Sandbox` with a replaced environment, an
//! optional DNS/hosts override and process-group cancellation. Remotes with
//! embedded credentials are redacted in every log line and error.
//!
//! # Example: Library Usage
//!
//! ```no_run
//! use gitsnap::config::SourceConfigBuilder;
//! use gitsnap::{CancellationToken, GitIdentifier, GitSource, LocalCache};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SourceConfigBuilder::new().cache_dir("/tmp/gitsnap").build()?;
//! let cache = LocalCache::open(&config.cache_dir)?;
//! let source = GitSource::new(Arc::new(cache), config);
//!
//! let id = GitIdentifier::parse("https://github.com/user/repo.git#main:docs")?;
//! let handler = source.resolve(id, None);
//!
//! let token = CancellationToken::new();
//! let info = handler.cache_key(&token)?;
//! println!("{} pinned at {}", info.key, info.pin);
//!
//! let snapshot = handler.snapshot(&token)?;
//! println!("checked out into {}", snapshot.mount()?.path().display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancellation;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod fsutil;
pub mod git;
pub mod locker;
pub mod prelude;
pub mod sandbox;
pub mod session;
pub mod signal;
pub mod source;

// Re-export key public types for easier use as a library
pub use cache::{CacheAccessor, ImmutableRef, LocalCache, MutableRef};
pub use cancellation::CancellationToken;
pub use config::{SourceConfig, SourceConfigBuilder};
pub use errors::{Error, Result};
pub use locker::KeyedLocker;
pub use session::{SessionProvider, StaticSession};
pub use source::{CacheKeyInfo, GitIdentifier, GitSource, GitSourceHandler};
