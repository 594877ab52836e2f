// src/cache/local.rs
//! A filesystem-backed cache accessor.
//!
//! Layout under the cache root:
//! - `refs/<id>/` holds the content of each ref.
//! - `metadata.json` is the index of every ref (state, policy, values, index keys).
//! - `metadata.lock` serializes index updates across processes.
//!
//! Which refs are held is tracked per `LocalCache` instance (and its clones).

use super::{
    cache_io_error, new_id, CacheAccessor, CachePolicy, CacheError, CacheResult, IdentityMapping,
    ImmutableRef, MutableRef, Mount, RecordType, RefMetadata, RefOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const INDEX_FILE: &str = "metadata.json";
const LOCK_FILE: &str = "metadata.lock";
const REFS_DIR: &str = "refs";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    refs: BTreeMap<String, RefRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefRecord {
    description: String,
    policy: CachePolicy,
    record_type: RecordType,
    committed: bool,
    #[serde(default)]
    values: BTreeMap<String, String>,
    #[serde(default)]
    indexes: BTreeSet<String>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    identity: Option<IdentityMapping>,
    held: Mutex<HashSet<String>>,
    index_lock: Mutex<()>,
}

/// Filesystem implementation of `CacheAccessor`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalCache {
    inner: Arc<Inner>,
}

impl LocalCache {
    /// Opens (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        Self::open_with_identity(root, None)
    }

    /// Like `open`, but every mount reports `identity` so that content gets
    /// chowned for a remapped sandbox.
    pub fn open_with_identity(
        root: impl Into<PathBuf>,
        identity: Option<IdentityMapping>,
    ) -> CacheResult<Self> {
        let root = root.into();
        let refs = root.join(REFS_DIR);
        fs::create_dir_all(&refs).map_err(|e| cache_io_error(e, &refs))?;
        log::debug!("Opened local cache at {}", root.display());
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                identity,
                held: Mutex::new(HashSet::new()),
                index_lock: Mutex::new(()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Directory holding the content of ref `id`.
    pub fn ref_path(&self, id: &str) -> PathBuf {
        self.inner.root.join(REFS_DIR).join(id)
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the on-disk index under both the in-process and the
    /// cross-process lock. The index is written back when `f` reports a change.
    fn with_index<T>(&self, f: impl FnOnce(&mut Index) -> CacheResult<(T, bool)>) -> CacheResult<T> {
        let _guard = self
            .inner
            .index_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let lock_path = self.inner.root.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| cache_io_error(e, &lock_path))?;
        fs2::FileExt::lock_exclusive(&lock_file).map_err(|e| cache_io_error(e, &lock_path))?;

        let mut index = self.read_index()?;
        let (value, changed) = f(&mut index)?;
        if changed {
            self.write_index(&index)?;
        }
        // Closing the file drops the advisory lock.
        drop(lock_file);
        Ok(value)
    }

    fn read_index(&self) -> CacheResult<Index> {
        let path = self.inner.root.join(INDEX_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(cache_io_error(e, &path)),
        }
    }

    fn write_index(&self, index: &Index) -> CacheResult<()> {
        let path = self.inner.root.join(INDEX_FILE);
        let tmp = self.inner.root.join(format!("{}.tmp", INDEX_FILE));
        let bytes = serde_json::to_vec_pretty(index)?;
        fs::write(&tmp, bytes).map_err(|e| cache_io_error(e, &tmp))?;
        fs::rename(&tmp, &path).map_err(|e| cache_io_error(e, &path))
    }

    fn mount_ref(&self, id: &str) -> CacheResult<Mount> {
        let path = self.ref_path(id);
        fs::create_dir_all(&path).map_err(|e| cache_io_error(e, &path))?;
        log::trace!("Mounted ref {} at {}", id, path.display());
        Ok(Mount::new(path, self.inner.identity))
    }

    fn set_string(&self, id: &str, key: &str, value: &str, index_key: &str) -> CacheResult<()> {
        self.with_index(|index| {
            let record = index
                .refs
                .get_mut(id)
                .ok_or_else(|| CacheError::NotFound(id.to_string()))?;
            record.values.insert(key.to_string(), value.to_string());
            if !index_key.is_empty() {
                record.indexes.insert(index_key.to_string());
            }
            Ok(((), true))
        })
    }

    fn get_string(&self, id: &str, key: &str) -> Option<String> {
        let index = match self.read_index() {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Failed to read cache index while looking up {} on {}: {}", key, id, e);
                return None;
            }
        };
        index.refs.get(id)?.values.get(key).cloned()
    }

    fn release_mutable(&self, id: &str) -> CacheResult<()> {
        self.held().remove(id);
        let removed = self.with_index(|index| {
            let discard = index
                .refs
                .get(id)
                .map_or(false, |r| !r.committed && r.policy != CachePolicy::Retain);
            if discard {
                index.refs.remove(id);
            }
            Ok((discard, discard))
        })?;
        if removed {
            let path = self.ref_path(id);
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(cache_io_error(e, &path)),
            }
            log::debug!("Discarded uncommitted ref {}", id);
        }
        Ok(())
    }
}

impl CacheAccessor for LocalCache {
    fn new_mutable(&self, opts: RefOptions) -> CacheResult<Box<dyn MutableRef>> {
        let id = new_id();
        let path = self.ref_path(&id);
        fs::create_dir_all(&path).map_err(|e| cache_io_error(e, &path))?;
        self.with_index(|index| {
            index.refs.insert(
                id.clone(),
                RefRecord {
                    description: opts.description.clone(),
                    policy: opts.policy,
                    record_type: opts.record_type,
                    committed: false,
                    values: BTreeMap::new(),
                    indexes: BTreeSet::new(),
                },
            );
            Ok(((), true))
        })?;
        self.held().insert(id.clone());
        log::debug!("Created mutable ref {} ({})", id, opts.description);
        Ok(Box::new(LocalMutableRef {
            cache: self.clone(),
            id,
            released: false,
        }))
    }

    fn get_mutable(&self, id: &str) -> CacheResult<Box<dyn MutableRef>> {
        let committed = self.with_index(|index| {
            let record = index
                .refs
                .get(id)
                .ok_or_else(|| CacheError::NotFound(id.to_string()))?;
            Ok((record.committed, false))
        })?;
        if committed {
            return Err(CacheError::InvalidState {
                id: id.to_string(),
                actual: "committed",
                expected: "mutable",
            });
        }
        if !self.held().insert(id.to_string()) {
            return Err(CacheError::Locked(id.to_string()));
        }
        Ok(Box::new(LocalMutableRef {
            cache: self.clone(),
            id: id.to_string(),
            released: false,
        }))
    }

    fn get(&self, id: &str) -> CacheResult<Box<dyn ImmutableRef>> {
        let committed = self.with_index(|index| {
            let record = index
                .refs
                .get(id)
                .ok_or_else(|| CacheError::NotFound(id.to_string()))?;
            Ok((record.committed, false))
        })?;
        if !committed {
            return Err(CacheError::InvalidState {
                id: id.to_string(),
                actual: "mutable",
                expected: "committed",
            });
        }
        Ok(Box::new(LocalImmutableRef {
            cache: self.clone(),
            id: id.to_string(),
        }))
    }

    fn search(&self, index_prefix: &str) -> CacheResult<Vec<RefMetadata>> {
        self.with_index(|index| {
            let found = index
                .refs
                .iter()
                .filter(|(_, r)| r.indexes.iter().any(|i| i.starts_with(index_prefix)))
                .map(|(id, r)| RefMetadata {
                    id: id.clone(),
                    values: r.values.clone(),
                })
                .collect();
            Ok((found, false))
        })
    }
}

#[derive(Debug)]
struct LocalMutableRef {
    cache: LocalCache,
    id: String,
    released: bool,
}

impl MutableRef for LocalMutableRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn mount(&self) -> CacheResult<Mount> {
        self.cache.mount_ref(&self.id)
    }

    fn set_string(&self, key: &str, value: &str, index: &str) -> CacheResult<()> {
        self.cache.set_string(&self.id, key, value, index)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.cache.get_string(&self.id, key)
    }

    fn commit(mut self: Box<Self>) -> CacheResult<Box<dyn ImmutableRef>> {
        let id = self.id.clone();
        self.cache.with_index(|index| {
            let record = index
                .refs
                .get_mut(&id)
                .ok_or_else(|| CacheError::NotFound(id.clone()))?;
            record.committed = true;
            Ok(((), true))
        })?;
        self.cache.held().remove(&id);
        self.released = true;
        log::debug!("Committed ref {}", id);
        Ok(Box::new(LocalImmutableRef {
            cache: self.cache.clone(),
            id,
        }))
    }

    fn release(mut self: Box<Self>) -> CacheResult<()> {
        self.released = true;
        self.cache.release_mutable(&self.id)
    }
}

impl Drop for LocalMutableRef {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.cache.release_mutable(&self.id) {
                log::warn!("Failed to release dropped ref {}: {}", self.id, e);
            }
        }
    }
}

#[derive(Debug)]
struct LocalImmutableRef {
    cache: LocalCache,
    id: String,
}

impl ImmutableRef for LocalImmutableRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn mount(&self) -> CacheResult<Mount> {
        let path = self.cache.ref_path(&self.id);
        if !path.is_dir() {
            return Err(CacheError::NotFound(self.id.clone()));
        }
        Ok(Mount::new(path, self.cache.inner.identity))
    }

    fn set_string(&self, key: &str, value: &str, index: &str) -> CacheResult<()> {
        self.cache.set_string(&self.id, key, value, index)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.cache.get_string(&self.id, key)
    }

    fn release(self: Box<Self>) -> CacheResult<()> {
        log::trace!("Released immutable ref {}", self.id);
        Ok(())
    }
}
