//! Index entries tagging mirror and snapshot refs.

use crate::cache::{CacheAccessor, CacheResult, ImmutableRef, MutableRef, RefMetadata};
use crate::constants::{INDEX_GIT_REMOTE, INDEX_GIT_SNAPSHOT, KEY_GIT_REMOTE, KEY_GIT_SNAPSHOT};

/// Refs whose `key` equals `value`, found through the `index_prefix + value` index.
///
/// The accessor searches by prefix, so `https://host/repo` would also match
/// `https://host/repo-other` without the exact comparison.
fn search(
    cache: &dyn CacheAccessor,
    key: &str,
    index_prefix: &str,
    value: &str,
) -> CacheResult<Vec<RefMetadata>> {
    let found = cache.search(&format!("{}{}", index_prefix, value))?;
    Ok(found
        .into_iter()
        .filter(|md| md.get_string(key) == Some(value))
        .collect())
}

/// Mirror refs of `remote`.
pub(crate) fn search_git_remote(
    cache: &dyn CacheAccessor,
    remote: &str,
) -> CacheResult<Vec<RefMetadata>> {
    search(cache, KEY_GIT_REMOTE, INDEX_GIT_REMOTE, remote)
}

/// Snapshot refs built for `snapshot_key`.
pub(crate) fn search_git_snapshot(
    cache: &dyn CacheAccessor,
    snapshot_key: &str,
) -> CacheResult<Vec<RefMetadata>> {
    search(cache, KEY_GIT_SNAPSHOT, INDEX_GIT_SNAPSHOT, snapshot_key)
}

pub(crate) fn set_git_remote(md: &dyn MutableRef, remote: &str) -> CacheResult<()> {
    md.set_string(
        KEY_GIT_REMOTE,
        remote,
        &format!("{}{}", INDEX_GIT_REMOTE, remote),
    )
}

pub(crate) fn set_git_snapshot(md: &dyn ImmutableRef, snapshot_key: &str) -> CacheResult<()> {
    md.set_string(
        KEY_GIT_SNAPSHOT,
        snapshot_key,
        &format!("{}{}", INDEX_GIT_SNAPSHOT, snapshot_key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalCache, RefOptions};

    #[test]
    fn test_remote_search_is_exact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = LocalCache::open(dir.path())?;

        let a = cache.new_mutable(RefOptions::new("a").retain())?;
        set_git_remote(a.as_ref(), "https://example.com/repo")?;
        let b = cache.new_mutable(RefOptions::new("b").retain())?;
        set_git_remote(b.as_ref(), "https://example.com/repo-other")?;

        let found = search_git_remote(&cache, "https://example.com/repo")?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id());
        assert!(search_git_remote(&cache, "https://example.com/nope")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_snapshot_roundtrip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = LocalCache::open(dir.path())?;
        let key = format!("{}:sub", "a".repeat(40));

        let snap = cache.new_mutable(RefOptions::new("snap"))?.commit()?;
        set_git_snapshot(snap.as_ref(), &key)?;

        let found = search_git_snapshot(&cache, &key)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_string(KEY_GIT_SNAPSHOT), Some(key.as_str()));
        assert!(search_git_snapshot(&cache, &format!("{}:", "a".repeat(40)))?.is_empty());
        Ok(())
    }
}
