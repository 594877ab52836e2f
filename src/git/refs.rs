//! Interpreting `git ls-remote` output.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMIT_SHA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{40}$").unwrap());

static DEFAULT_BRANCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"refs/heads/(\S+)").unwrap());

/// Whether `s` is a full, lowercase 40-character commit SHA.
///
/// # Examples
/// ```
/// use gitsnap::git::is_commit_sha;
///
/// assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
/// assert!(!is_commit_sha("0123456"));
/// assert!(!is_commit_sha("0123456789ABCDEF0123456789ABCDEF01234567"));
/// ```
pub fn is_commit_sha(s: &str) -> bool {
    COMMIT_SHA_RE.is_match(s)
}

/// Extracts the branch name from `ls-remote --symref <remote> HEAD` output.
///
/// ```
/// use gitsnap::git::parse_default_branch;
///
/// let out = "ref: refs/heads/main\tHEAD\n0123456789abcdef0123456789abcdef01234567\tHEAD\n";
/// assert_eq!(parse_default_branch(out).as_deref(), Some("main"));
/// ```
pub fn parse_default_branch(output: &str) -> Option<String> {
    DEFAULT_BRANCH_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Picks the commit a ref resolves to from `ls-remote origin <ref> <ref>^{}` output.
///
/// Matching mirrors `git checkout`: an exact branch `refs/heads/<ref>` wins,
/// then an exact `refs/<ref>` (custom refs, or a fully qualified name), then a
/// tag. For annotated tags the peeled `refs/tags/<ref>^{}` line is used so the
/// result is the commit, not the tag object.
pub fn select_ref_sha(output: &str, git_ref: &str) -> Option<String> {
    let partial_ref = format!("refs/{}", git_ref.trim_start_matches("refs/"));
    let head_ref = format!("refs/heads/{}", git_ref.trim_start_matches("refs/heads/"));
    let tag_ref = format!("refs/tags/{}", git_ref.trim_start_matches("refs/tags/"));
    let peeled_tag_ref = format!("{}^{{}}", tag_ref);

    let mut head_sha = None;
    let mut partial_sha = None;
    let mut tag_sha = None;
    let mut peeled_tag_sha = None;

    for line in output.lines() {
        let Some((sha, name)) = line.split_once('\t') else {
            continue;
        };
        let sha = sha.trim();
        let name = name.trim();
        if name == head_ref {
            head_sha = Some(sha);
        }
        if name == partial_ref {
            partial_sha = Some(sha);
        }
        if name == tag_ref {
            tag_sha = Some(sha);
        }
        if name == peeled_tag_ref {
            peeled_tag_sha = Some(sha);
        }
    }

    head_sha
        .or(partial_sha)
        .or(peeled_tag_sha)
        .or(tag_sha)
        .map(str::to_string)
}
