//! The `gitsnap` prelude for convenient library usage.
//!
//! # Example
//!
//! ```
//! use gitsnap::prelude::*;
//! # fn main() -> Result<()> {
//!
//! let id = GitIdentifier::parse("github.com/user/repo.git#v1.2.3")?;
//! assert_eq!(id.git_ref, "v1.2.3");
//! let token = CancellationToken::new();
//! assert!(!token.is_cancelled());
//!
//! # Ok(())
//! # }
//! ```

pub use crate::cache::{
    CacheAccessor, CachePolicy, ImmutableRef, LocalCache, Mount, MutableRef, RecordType,
    RefOptions,
};
pub use crate::cancellation::CancellationToken;
pub use crate::config::{SourceConfig, SourceConfigBuilder};
pub use crate::errors::{Error, Result};
pub use crate::git::{is_commit_sha, redact_credentials};
pub use crate::locker::KeyedLocker;
pub use crate::sandbox::{default_sandbox, DnsConfig, Sandbox};
pub use crate::session::{SessionProvider, StaticSession};
pub use crate::source::{CacheKeyInfo, GitIdentifier, GitSource, GitSourceHandler};
