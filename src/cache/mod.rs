// src/cache/mod.rs
//! The cache accessor contract consumed by the git source.
//!
//! A cache accessor is a content-addressable ref store: it hands out mutable
//! refs that can be mounted as directories and committed into immutable ones,
//! and keeps a string metadata index that supports prefix search. The source
//! provider only depends on the traits here; `local::LocalCache` is a plain
//! filesystem implementation.

mod local;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use local::LocalCache;

/// Errors reported by a cache accessor.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Another handle currently holds this mutable ref.
    #[error("ref {0} is locked")]
    Locked(String),

    #[error("ref {0} not found")]
    NotFound(String),

    /// The ref exists but cannot be used this way (e.g. asking a committed ref for a mutable handle).
    #[error("ref {id} is {actual}, expected {expected}")]
    InvalidState {
        id: String,
        actual: &'static str,
        expected: &'static str,
    },

    #[error("cache I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache metadata is corrupt: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

pub(crate) fn cache_io_error<P: AsRef<Path>>(source: std::io::Error, path: P) -> CacheError {
    CacheError::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

/// Whether the accessor may delete a ref once nobody holds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    Default,
    /// Keep the ref after release; garbage collection is up to the accessor.
    Retain,
}

/// What kind of content a ref holds, for accounting and pruning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordType {
    #[default]
    Regular,
    GitCheckout,
}

/// Options for creating a new mutable ref.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefOptions {
    pub description: String,
    pub policy: CachePolicy,
    pub record_type: RecordType,
}

impl RefOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn retain(mut self) -> Self {
        self.policy = CachePolicy::Retain;
        self
    }

    pub fn record_type(mut self, record_type: RecordType) -> Self {
        self.record_type = record_type;
        self
    }
}

/// UID/GID that "root" maps to when content is used by a remapped sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub root_uid: u32,
    pub root_gid: u32,
}

/// A ref mounted as a directory. Unmounts when dropped.
pub struct Mount {
    path: PathBuf,
    identity: Option<IdentityMapping>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Mount {
    pub fn new(path: impl Into<PathBuf>, identity: Option<IdentityMapping>) -> Self {
        Self {
            path: path.into(),
            identity,
            release: None,
        }
    }

    /// Registers the action that undoes this mount.
    pub fn on_unmount(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity_mapping(&self) -> Option<IdentityMapping> {
        self.identity
    }

    /// Unmounts now instead of at drop.
    pub fn unmount(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("mounted", &self.release.is_some())
            .finish()
    }
}

/// The metadata of one ref, as returned by `search`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefMetadata {
    pub id: String,
    pub values: BTreeMap<String, String>,
}

impl RefMetadata {
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A content-addressable ref store.
pub trait CacheAccessor: Send + Sync + fmt::Debug {
    /// Creates and holds a new, empty mutable ref.
    fn new_mutable(&self, opts: RefOptions) -> CacheResult<Box<dyn MutableRef>>;

    /// Acquires an existing mutable ref. Fails with `CacheError::Locked` while
    /// another handle holds it.
    fn get_mutable(&self, id: &str) -> CacheResult<Box<dyn MutableRef>>;

    /// Opens an existing immutable ref.
    fn get(&self, id: &str) -> CacheResult<Box<dyn ImmutableRef>>;

    /// All refs with an index key starting with `index_prefix`.
    fn search(&self, index_prefix: &str) -> CacheResult<Vec<RefMetadata>>;
}

/// A writable ref, held exclusively by its handle.
pub trait MutableRef: Send + fmt::Debug {
    fn id(&self) -> &str;

    fn mount(&self) -> CacheResult<Mount>;

    /// Stores `key = value`, searchable under `index` when it is non-empty.
    fn set_string(&self, key: &str, value: &str, index: &str) -> CacheResult<()>;

    fn get_string(&self, key: &str) -> Option<String>;

    /// Finalizes the content. The mutable handle is consumed.
    fn commit(self: Box<Self>) -> CacheResult<Box<dyn ImmutableRef>>;

    fn release(self: Box<Self>) -> CacheResult<()>;
}

/// A finalized, read-only ref.
pub trait ImmutableRef: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Mounts the content read-only.
    fn mount(&self) -> CacheResult<Mount>;

    fn set_string(&self, key: &str, value: &str, index: &str) -> CacheResult<()>;

    fn get_string(&self, key: &str) -> Option<String>;

    fn release(self: Box<Self>) -> CacheResult<()>;
}

/// Releases a mutable ref when dropped, unless it was committed or released first.
#[derive(Debug)]
pub struct MutableGuard {
    id: String,
    inner: Option<Box<dyn MutableRef>>,
}

impl MutableGuard {
    pub fn new(inner: Box<dyn MutableRef>) -> Self {
        Self {
            id: inner.id().to_string(),
            inner: Some(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The held ref.
    pub fn get(&self) -> CacheResult<&dyn MutableRef> {
        self.inner.as_deref().ok_or_else(|| CacheError::InvalidState {
            id: self.id.clone(),
            actual: "released",
            expected: "mutable",
        })
    }

    pub fn commit(mut self) -> CacheResult<Box<dyn ImmutableRef>> {
        match self.inner.take() {
            Some(r) => r.commit(),
            None => Err(CacheError::InvalidState {
                id: self.id.clone(),
                actual: "released",
                expected: "mutable",
            }),
        }
    }

    pub fn release(mut self) -> CacheResult<()> {
        match self.inner.take() {
            Some(r) => r.release(),
            None => Ok(()),
        }
    }
}

impl Drop for MutableGuard {
    fn drop(&mut self) {
        if let Some(r) = self.inner.take() {
            if let Err(e) = r.release() {
                log::warn!("Failed to release mutable ref {}: {}", self.id, e);
            }
        }
    }
}

/// Releases an immutable ref when dropped, unless ownership was taken back.
#[derive(Debug)]
pub struct ImmutableGuard {
    id: String,
    inner: Option<Box<dyn ImmutableRef>>,
}

impl ImmutableGuard {
    pub fn new(inner: Box<dyn ImmutableRef>) -> Self {
        Self {
            id: inner.id().to_string(),
            inner: Some(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> CacheResult<&dyn ImmutableRef> {
        self.inner.as_deref().ok_or_else(|| CacheError::InvalidState {
            id: self.id.clone(),
            actual: "released",
            expected: "committed",
        })
    }

    /// Hands the ref to the caller; it is no longer released on drop.
    pub fn into_inner(mut self) -> CacheResult<Box<dyn ImmutableRef>> {
        self.inner.take().ok_or_else(|| CacheError::InvalidState {
            id: self.id.clone(),
            actual: "released",
            expected: "committed",
        })
    }
}

impl Drop for ImmutableGuard {
    fn drop(&mut self) {
        if let Some(r) = self.inner.take() {
            if let Err(e) = r.release() {
                log::warn!("Failed to release immutable ref {}: {}", self.id, e);
            }
        }
    }
}

/// A fresh random-looking id: 25 hex chars of sha256 over time, pid and a counter.
pub fn new_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seed = format!(
        "{}-{}-{}",
        nanos,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let mut id = hex::encode(Sha256::digest(seed.as_bytes()));
    id.truncate(25);
    id
}
