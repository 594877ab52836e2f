//! Fetching a ref into the mirror and checking it out into a new cache ref.

use super::metadata::{search_git_snapshot, set_git_snapshot};
use super::GitSourceHandler;
use crate::cache::{new_id, ImmutableGuard, ImmutableRef, MutableGuard, RecordType, RefOptions};
use crate::cancellation::CancellationToken;
use crate::constants::PIN_REF_NAMESPACE;
use crate::errors::{io_error_with_path, Error, GitCommandError, Result};
use crate::fsutil::{chown_tree, clean_subdir, promote_subdir};
use crate::git::{is_commit_sha, GitCli};
use std::fs;
use std::path::{Path, PathBuf};

impl GitSourceHandler {
    /// Builds (or reuses) the immutable snapshot for this identifier.
    ///
    /// A snapshot already indexed under `cache_key:subdir` is returned without
    /// touching the mirror. Otherwise the ref is fetched into the mirror and
    /// checked out into a fresh cache ref, which is committed and indexed.
    #[tracing::instrument(skip_all, fields(id = %self.id))]
    pub fn snapshot(&self, token: &CancellationToken) -> Result<Box<dyn ImmutableRef>> {
        token.check()?;
        let cache_key = match self.remembered_cache_key() {
            Some(key) => key,
            None => self.cache_key(token)?.key,
        };
        let auth_args = self.auth_args();

        let snapshot_key = format!("{}:{}", cache_key, self.id.subdir);
        let _snapshot_lock = self.source.locker.lock(&snapshot_key);

        let cache = self.source.cache.as_ref();
        if let Some(md) = search_git_snapshot(cache, &snapshot_key)?.into_iter().next() {
            log::debug!("Reusing snapshot {} for {}", md.id, snapshot_key);
            return Ok(cache.get(&md.id)?);
        }
        let subdir = clean_subdir(&self.id.subdir)?;

        let remote = &self.id.remote;
        let _remote_lock = self.source.locker.lock(remote);
        let mirror = self.source.mount_remote(token, remote, &auth_args)?;
        let env = self.git_env(mirror.path(), auth_args)?;
        let git = &env.git;

        let git_ref = self.resolve_ref(token, git)?;
        self.fetch_into_mirror(token, git, mirror.path(), &git_ref)?;

        let opts = RefOptions::new(format!(
            "git snapshot for {}#{}",
            self.id.redacted_remote(),
            git_ref
        ))
        .record_type(RecordType::GitCheckout);
        let checkout_ref = MutableGuard::new(cache.new_mutable(opts)?);
        let mount = checkout_ref.get()?.mount()?;
        let checkout_dir = mount.path().to_path_buf();

        let git_dir = if self.id.keep_git_dir && subdir == "." {
            self.checkout_with_git_dir(token, git, mirror.path(), &checkout_dir, &git_ref)?
        } else {
            self.checkout_tree(token, git, mirror.path(), &checkout_dir, &git_ref, &subdir)?;
            mirror.path().to_path_buf()
        };

        git.within_dir(Some(git_dir.as_path()), Some(checkout_dir.as_path()))
            .run(
                token,
                &["submodule", "update", "--init", "--recursive", "--depth=1"],
            )
            .map_err(|e| Error::submodule_failed(remote, e))?;

        if let Some(idmap) = mount.identity_mapping() {
            chown_tree(&checkout_dir, idmap.root_uid, idmap.root_gid)?;
        }

        mount.unmount();
        let snap = ImmutableGuard::new(checkout_ref.commit()?);
        set_git_snapshot(snap.get()?, &snapshot_key)?;
        log::info!("Built snapshot {} for {}", snap.id(), self.id);
        Ok(snap.into_inner()?)
    }

    /// Makes `git_ref` available in the mirror.
    ///
    /// A commit SHA already present locally needs no fetch. Named refs are
    /// fetched shallowly and kept as `tags/<ref>` so later fetches advertise them.
    fn fetch_into_mirror(
        &self,
        token: &CancellationToken,
        git: &GitCli,
        mirror_dir: &Path,
        git_ref: &str,
    ) -> Result<()> {
        let is_sha = is_commit_sha(git_ref);
        if is_sha {
            let commit = format!("{}^{{commit}}", git_ref);
            match git.run(token, &["cat-file", "-e", commit.as_str()]) {
                Ok(_) => {
                    log::debug!("Commit {} already in mirror, skipping fetch", git_ref);
                    return Ok(());
                }
                Err(GitCommandError::Cancelled { .. }) => return Err(Error::Cancelled),
                Err(_) => {}
            }
        }

        let shallow_lock = mirror_dir.join("shallow.lock");
        match fs::remove_file(&shallow_lock) {
            Ok(()) => log::warn!("Removed stale {}", shallow_lock.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error_with_path(e, &shallow_lock)),
        }

        let mut args: Vec<String> = vec!["fetch".into()];
        if !is_sha {
            args.push("--depth=1".into());
            args.push("--no-tags".into());
        } else if mirror_dir.join("shallow").exists() {
            args.push("--unshallow".into());
        }
        args.push("origin".into());
        if !is_sha {
            // Force: a branch may have moved since the last fetch.
            args.push("--force".into());
            args.push(format!("{}:tags/{}", git_ref, git_ref));
        }
        log::info!("Fetching {} from {}", git_ref, self.id.redacted_remote());
        git.run(token, &args)
            .map_err(|e| Error::fetch_failed(&self.id.remote, e))?;

        self.expire_reflog(token, git)
    }

    /// Checks `git_ref` out with its own `.git`, fetched from the mirror.
    ///
    /// Returns the new git dir.
    fn checkout_with_git_dir(
        &self,
        token: &CancellationToken,
        git: &GitCli,
        mirror_dir: &Path,
        checkout_dir: &Path,
        git_ref: &str,
    ) -> Result<PathBuf> {
        let remote = &self.id.remote;
        let git_dir = checkout_dir.join(".git");
        fs::create_dir_all(checkout_dir).map_err(|e| io_error_with_path(e, checkout_dir))?;
        let checkout_git = git.within_dir(Some(git_dir.as_path()), Some(checkout_dir));

        checkout_git
            .run(token, &["-c", "init.defaultBranch=master", "init"])
            .map_err(|e| Error::git("failed to init checkout", e))?;
        // file:// disables the local-clone shortcut, which would hardlink
        // arbitrary host files referenced by the mirror.
        let mirror_url = format!("file://{}", mirror_dir.display());
        checkout_git
            .run(token, &["remote", "add", "origin", mirror_url.as_str()])
            .map_err(|e| Error::git("failed to add mirror as origin", e))?;

        let object_type = git
            .run_text(token, &["cat-file", "-t", git_ref])
            .map_err(|e| Error::git(format!("failed to inspect ref {}", git_ref), e))?;

        let mut pin_ref = None;
        let pullref = if object_type == "tag" {
            format!("{}:refs/tags/{}", git_ref, git_ref)
        } else if is_commit_sha(git_ref) {
            let name = format!("{}/{}", PIN_REF_NAMESPACE, new_id());
            git.run(token, &["update-ref", name.as_str(), git_ref])
                .map_err(|e| Error::git(format!("failed to pin commit {}", git_ref), e))?;
            pin_ref = Some(name.clone());
            name
        } else {
            format!("{}:{}", git_ref, git_ref)
        };

        let fetched = checkout_git.run(
            token,
            &["fetch", "-u", "--depth=1", "origin", pullref.as_str()],
        );
        if let Some(name) = pin_ref {
            if let Err(e) = git.run(token, &["update-ref", "-d", name.as_str()]) {
                log::warn!("Failed to delete temporary ref {}: {}", name, e);
            }
        }
        fetched.map_err(|e| Error::fetch_failed(remote, e))?;

        checkout_git
            .run(token, &["checkout", "FETCH_HEAD"])
            .map_err(|e| Error::checkout_failed(remote, e))?;
        let redacted = self.id.redacted_remote();
        checkout_git
            .run(token, &["remote", "set-url", "origin", redacted.as_str()])
            .map_err(|e| Error::git(format!("failed to set remote origin to {}", redacted), e))?;
        self.expire_reflog(token, &checkout_git)?;

        let fetch_head = git_dir.join("FETCH_HEAD");
        match fs::remove_file(&fetch_head) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error_with_path(e, &fetch_head)),
        }
        Ok(git_dir)
    }

    /// Checks the tree of `git_ref` out of the mirror, keeping only `subdir`.
    fn checkout_tree(
        &self,
        token: &CancellationToken,
        git: &GitCli,
        mirror_dir: &Path,
        checkout_dir: &Path,
        git_ref: &str,
        subdir: &str,
    ) -> Result<()> {
        let remote = &self.id.remote;
        if subdir == "." {
            return git
                .within_dir(Some(mirror_dir), Some(checkout_dir))
                .run(token, &["checkout", git_ref, "--", "."])
                .map(|_| ())
                .map_err(|e| Error::checkout_failed(remote, e));
        }

        let staging = tempfile::Builder::new()
            .prefix("checkout")
            .tempdir_in(checkout_dir)
            .map_err(|e| io_error_with_path(e, checkout_dir))?;
        git.within_dir(Some(mirror_dir), Some(staging.path()))
            .run(token, &["checkout", git_ref, "--", "."])
            .map_err(|e| Error::checkout_failed(remote, e))?;
        promote_subdir(staging.path(), subdir, checkout_dir)?;
        let staging_path = staging.path().to_path_buf();
        staging
            .close()
            .map_err(|e| io_error_with_path(e, staging_path))
    }

    fn expire_reflog(&self, token: &CancellationToken, git: &GitCli) -> Result<()> {
        git.run(token, &["reflog", "expire", "--all", "--expire=now"])
            .map(|_| ())
            .map_err(|e| {
                Error::git(
                    format!(
                        "failed to expire reflog for remote {}",
                        self.id.redacted_remote()
                    ),
                    e,
                )
            })
    }
}
