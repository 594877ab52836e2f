//! The per-remote bare mirror.

use super::metadata::{search_git_remote, set_git_remote};
use super::GitSource;
use crate::cache::{CacheError, Mount, MutableGuard, RecordType, RefOptions};
use crate::cancellation::CancellationToken;
use crate::errors::{Error, Result};
use crate::git::{redact_credentials, GitCliOptions};
use std::path::Path;

/// A mounted mirror ref. Dropping it unmounts, then releases the ref.
#[derive(Debug)]
pub struct RemoteMirror {
    // Field order is drop order.
    mount: Mount,
    remote_ref: MutableGuard,
}

impl RemoteMirror {
    /// The bare repository directory.
    pub fn path(&self) -> &Path {
        self.mount.path()
    }

    pub fn id(&self) -> &str {
        self.remote_ref.id()
    }
}

impl GitSource {
    /// Mounts the mirror of `remote`, creating and initializing it on first use.
    ///
    /// Must be called with the remote locked.
    #[tracing::instrument(skip_all, fields(remote = %redact_credentials(remote)))]
    pub(crate) fn mount_remote(
        &self,
        token: &CancellationToken,
        remote: &str,
        auth_args: &[String],
    ) -> Result<RemoteMirror> {
        let mut existing = None;
        for md in search_git_remote(self.cache.as_ref(), remote)? {
            match self.cache.get_mutable(&md.id) {
                Ok(r) => {
                    existing = Some(r);
                    break;
                }
                Err(CacheError::Locked(id)) => {
                    log::warn!(
                        "Mirror ref {} for {} is locked, trying the next one",
                        id,
                        redact_credentials(remote)
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let initialize = existing.is_none();
        let remote_ref = match existing {
            Some(r) => MutableGuard::new(r),
            None => {
                let opts = RefOptions::new(format!(
                    "shared git repo for {}",
                    redact_credentials(remote)
                ))
                .retain()
                .record_type(RecordType::GitCheckout);
                MutableGuard::new(self.cache.new_mutable(opts)?)
            }
        };

        let mount = remote_ref.get()?.mount()?;
        let mirror = RemoteMirror { mount, remote_ref };

        if initialize {
            let dir = mirror.path();
            log::info!(
                "Initializing mirror {} for {}",
                mirror.id(),
                redact_credentials(remote)
            );
            let git = self.local_git_cli(GitCliOptions {
                git_dir: Some(dir.to_path_buf()),
                auth_args: auth_args.to_vec(),
                ..Default::default()
            });
            git.run(token, &["-c", "init.defaultBranch=master", "init", "--bare"])
                .map_err(|e| Error::git(format!("failed to init repo at {}", dir.display()), e))?;
            git.run(token, &["remote", "add", "origin", remote])
                .map_err(|e| {
                    Error::git(format!("failed to add origin repo at {}", dir.display()), e)
                })?;
            set_git_remote(mirror.remote_ref.get()?, remote)?;
        }
        Ok(mirror)
    }
}
