// tests/common/mod.rs
#![allow(dead_code)]

use gitsnap::config::SourceConfig;
use gitsnap::errors::GitCommandError;
use gitsnap::sandbox::{
    default_sandbox, CommandOutput, DnsConfig, NetworkOverride, ProcessLimits, Sandbox,
    SandboxCommand,
};
use gitsnap::{CancellationToken, GitSource, ImmutableRef, LocalCache};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// Returns a command for the `gitsnap` binary under test.
pub fn gitsnap_cmd() -> std::process::Command {
    std::process::Command::new(assert_cmd::cargo::cargo_bin!("gitsnap"))
}

/// A local repository served over `file://`.
///
/// History:
/// - `first`: `abc` = "foo", `def` = "bar", `sub/bar` = "abc"; annotated tag `v1.2.3`
/// - `second` (master): adds `foo13`; lightweight tag `lightweight-tag` and `refs/test`
/// - `feature`: branch off `second` adding `ghi` = "baz"
pub struct TestRepo {
    pub dir: TempDir,
    pub url: String,
    pub first: String,
    pub second: String,
    pub feature: String,
    pub annotated_tag: String,
}

impl TestRepo {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let repo_path = dir.path().join("repo");
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("master");
        let repo = git2::Repository::init_opts(&repo_path, &opts)?;
        let sig = git2::Signature::now("Test User", "test@example.com")?;

        let first = commit_files(
            &repo,
            &sig,
            Some("HEAD"),
            &[("abc", "foo\n"), ("def", "bar\n"), ("sub/bar", "abc\n")],
            &[],
            "first",
        )?;
        let first_commit = repo.find_commit(first)?;
        let annotated_tag = repo.tag(
            "v1.2.3",
            first_commit.as_object(),
            &sig,
            "release v1.2.3",
            false,
        )?;

        let second = commit_files(
            &repo,
            &sig,
            Some("HEAD"),
            &[("foo13", "sbb\n")],
            &[&first_commit],
            "second",
        )?;
        let second_commit = repo.find_commit(second)?;
        repo.tag_lightweight("lightweight-tag", second_commit.as_object(), false)?;
        repo.reference("refs/test", second, false, "custom ref")?;

        let feature = commit_files(
            &repo,
            &sig,
            Some("refs/heads/feature"),
            &[("ghi", "baz\n")],
            &[&second_commit],
            "feature",
        )?;

        let url = file_url(&repo_path);
        Ok(Self {
            dir,
            url,
            first: first.to_string(),
            second: second.to_string(),
            feature: feature.to_string(),
            annotated_tag: annotated_tag.to_string(),
        })
    }
}

/// Writes `files` into the work tree, stages them on top of the current index
/// and commits to `update_ref`.
fn commit_files(
    repo: &git2::Repository,
    sig: &git2::Signature<'_>,
    update_ref: Option<&str>,
    files: &[(&str, &str)],
    parents: &[&git2::Commit<'_>],
    message: &str,
) -> Result<git2::Oid, Box<dyn std::error::Error>> {
    let workdir = repo.workdir().ok_or("repository has no work tree")?;
    let mut index = repo.index()?;
    for (name, content) in files {
        let path = workdir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        index.add_path(Path::new(name))?;
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    Ok(repo.commit(update_ref, sig, sig, message, &tree, parents)?)
}

pub fn file_url(path: &Path) -> String {
    #[cfg(windows)]
    {
        format!("file:///{}", path.to_string_lossy().replace('\\', "/"))
    }
    #[cfg(not(windows))]
    {
        format!("file://{}", path.display())
    }
}

/// A source over a fresh `LocalCache` rooted at `cache_dir`.
pub fn git_source(cache_dir: &Path) -> Result<GitSource, Box<dyn std::error::Error>> {
    let cache = LocalCache::open(cache_dir)?;
    Ok(GitSource::new(
        Arc::new(cache),
        SourceConfig::default_for_test(cache_dir),
    ))
}

/// Sorted names of the top-level entries of a snapshot.
pub fn snapshot_entries(snapshot: &dyn ImmutableRef) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mount = snapshot.mount()?;
    let mut names = fs::read_dir(mount.path())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

pub fn read_snapshot_file(
    snapshot: &dyn ImmutableRef,
    name: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mount = snapshot.mount()?;
    Ok(fs::read_to_string(mount.path().join(name))?)
}

/// Runs commands through the platform sandbox and counts `git fetch` calls.
#[derive(Debug)]
pub struct FetchCounter {
    inner: Arc<dyn Sandbox>,
    fetches: AtomicUsize,
}

impl FetchCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: default_sandbox(ProcessLimits::default()),
            fetches: AtomicUsize::new(0),
        })
    }

    /// Returns the number of fetches since the last call and resets it.
    pub fn take(&self) -> usize {
        self.fetches.swap(0, Ordering::SeqCst)
    }
}

impl Sandbox for FetchCounter {
    fn name(&self) -> &'static str {
        "fetch-counter"
    }

    fn prepare_network(
        &self,
        dns: Option<&DnsConfig>,
        hosts: Option<&Path>,
    ) -> gitsnap::Result<Option<NetworkOverride>> {
        self.inner.prepare_network(dns, hosts)
    }

    fn run(
        &self,
        cmd: &SandboxCommand<'_>,
        token: &CancellationToken,
    ) -> Result<CommandOutput, GitCommandError> {
        if cmd.args.iter().any(|arg| arg == "fetch") {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.run(cmd, token)
    }
}
