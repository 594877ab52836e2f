//! Filesystem helpers for building snapshots.

use crate::errors::{io_error_with_path, Error, Result};
use std::fs;
use std::path::Path;

/// Whether `path` equals `prefix` or lies below it, compared component-wise.
///
/// Both `/` and `\` count as separators, so Windows-style paths work on any host.
///
/// # Examples
/// ```
/// use gitsnap::fsutil::has_prefix;
///
/// assert!(has_prefix("/foo/bar", "/foo"));
/// assert!(!has_prefix("/foo/bar", "/bar"));
/// assert!(!has_prefix("/foobar", "/foo"));
/// assert!(has_prefix("C:\\foo\\bar", "C:\\foo"));
/// ```
pub fn has_prefix(path: impl AsRef<Path>, prefix: impl AsRef<Path>) -> bool {
    let path = path.as_ref().to_string_lossy();
    let prefix = prefix.as_ref().to_string_lossy();
    let is_sep = |c: char| c == '/' || c == '\\';

    let path_parts: Vec<&str> = path.split(is_sep).collect();
    let mut prefix_parts: Vec<&str> = prefix.split(is_sep).collect();
    // A trailing separator on the prefix ("/foo/") names the same directory.
    while prefix_parts.len() > 1 && prefix_parts.last() == Some(&"") {
        prefix_parts.pop();
    }

    path_parts.len() >= prefix_parts.len()
        && path_parts
            .iter()
            .zip(prefix_parts.iter())
            .all(|(a, b)| a == b)
}

/// Lexically cleans a subdir fragment into a path relative to the repository root.
///
/// `""` and `"/"` become `"."`. Leading slashes and `.` components are dropped,
/// and `..` is resolved. A subdir that climbs above the root is rejected.
pub fn clean_subdir(subdir: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in subdir.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidIdentifier {
                        input: subdir.to_string(),
                        reason: "subdir escapes the repository root".to_string(),
                    });
                }
            }
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Moves the contents of `staging/<subdir>` up into `dest`.
///
/// The subdir is resolved through symlinks first and must stay inside
/// `staging`.
pub fn promote_subdir(staging: &Path, subdir: &str, dest: &Path) -> Result<()> {
    let staging_real = fs::canonicalize(staging).map_err(|e| io_error_with_path(e, staging))?;
    let source = staging.join(subdir);
    let source_real = fs::canonicalize(&source).map_err(|e| io_error_with_path(e, subdir))?;

    if !has_prefix(&source_real, &staging_real) {
        return Err(Error::InvalidIdentifier {
            input: subdir.to_string(),
            reason: "subdir resolves outside the repository".to_string(),
        });
    }
    if !source_real.is_dir() {
        return Err(Error::InvalidIdentifier {
            input: subdir.to_string(),
            reason: "subdir is not a directory".to_string(),
        });
    }

    let entries = fs::read_dir(&source_real).map_err(|e| io_error_with_path(e, &source_real))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error_with_path(e, &source_real))?;
        let target = dest.join(entry.file_name());
        fs::rename(entry.path(), &target).map_err(|e| io_error_with_path(e, &target))?;
    }
    Ok(())
}

/// Changes ownership of `root` and everything below it, without following symlinks.
#[cfg(unix)]
pub fn chown_tree(root: &Path, uid: u32, gid: u32) -> Result<()> {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            io_error_with_path(e.into(), path)
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
            .map_err(|e| io_error_with_path(e, entry.path()))?;
        count += 1;
    }
    log::debug!("Changed ownership of {} paths under {} to {}:{}", count, root.display(), uid, gid);
    Ok(())
}

#[cfg(not(unix))]
pub fn chown_tree(root: &Path, _uid: u32, _gid: u32) -> Result<()> {
    log::debug!("Ignoring identity mapping for {} on this platform", root.display());
    Ok(())
}
