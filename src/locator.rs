//! Best-effort lookup of the run that built a given commit.
//!
//! Providers report the commit of a run in different places, so a run exposes its
//! evidence through [`CommitEvidence`] and the locator tries each kind in a fixed
//! order. The scan is bounded by `max_depth`; history is never walked in full.

use std::fmt;

/// Shortest prefix accepted as a commit reference, as in `git rev-parse --short`.
pub const MIN_SHA_PREFIX: usize = 4;

/// Free text is noisy, so only longer hex tokens count there.
const MIN_TEXT_TOKEN: usize = 7;

/// Where a commit match was found, in the order the locator tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchMethod {
    ScmRevision,
    BranchRevision,
    BuildParameter,
    PullRequestCommit,
    Description,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScmRevision => "scm revision",
            Self::BranchRevision => "branch revision",
            Self::BuildParameter => "build parameter",
            Self::PullRequestCommit => "pull request commit",
            Self::Description => "description",
        };
        f.write_str(name)
    }
}

/// Commit information a raw run can offer. Every source defaults to empty.
pub trait CommitEvidence {
    /// Run or build number; the highest matching number wins.
    fn run_number(&self) -> u64;

    fn scm_revisions(&self) -> Vec<String> {
        Vec::new()
    }

    fn branch_revisions(&self) -> Vec<String> {
        Vec::new()
    }

    fn commit_parameters(&self) -> Vec<String> {
        Vec::new()
    }

    fn pull_request_commits(&self) -> Vec<String> {
        Vec::new()
    }

    /// Free-text cause or description fields, searched for hex tokens.
    fn descriptions(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<R: CommitEvidence + ?Sized> CommitEvidence for &R {
    fn run_number(&self) -> u64 {
        (**self).run_number()
    }

    fn scm_revisions(&self) -> Vec<String> {
        (**self).scm_revisions()
    }

    fn branch_revisions(&self) -> Vec<String> {
        (**self).branch_revisions()
    }

    fn commit_parameters(&self) -> Vec<String> {
        (**self).commit_parameters()
    }

    fn pull_request_commits(&self) -> Vec<String> {
        (**self).pull_request_commits()
    }

    fn descriptions(&self) -> Vec<String> {
        (**self).descriptions()
    }
}

#[derive(Debug)]
pub struct CommitMatch<'a, R> {
    pub run: &'a R,
    pub method: MatchMethod,
}

/// Case-insensitive comparison where either side may be a prefix of the other.
pub fn sha_matches(candidate: &str, target: &str) -> bool {
    let candidate = candidate.trim();
    let target = target.trim();
    if candidate.len() < MIN_SHA_PREFIX || target.len() < MIN_SHA_PREFIX {
        return false;
    }
    let candidate = candidate.to_ascii_lowercase();
    let target = target.to_ascii_lowercase();
    candidate.starts_with(&target) || target.starts_with(&candidate)
}

fn hex_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_hexdigit())
        .filter(|token| (MIN_TEXT_TOKEN..=40).contains(&token.len()))
}

fn match_method<R: CommitEvidence>(run: &R, target: &str) -> Option<MatchMethod> {
    let any = |shas: Vec<String>| shas.iter().any(|sha| sha_matches(sha, target));

    if any(run.scm_revisions()) {
        Some(MatchMethod::ScmRevision)
    } else if any(run.branch_revisions()) {
        Some(MatchMethod::BranchRevision)
    } else if any(run.commit_parameters()) {
        Some(MatchMethod::BuildParameter)
    } else if any(run.pull_request_commits()) {
        Some(MatchMethod::PullRequestCommit)
    } else if run
        .descriptions()
        .iter()
        .any(|text| hex_tokens(text).any(|token| sha_matches(token, target)))
    {
        Some(MatchMethod::Description)
    } else {
        None
    }
}

/// Finds the most recent run among the first `max_depth` entries of `history` that
/// built `target_sha`.
///
/// `history` is expected most-recent-first, but the result does not depend on it:
/// all matches in the window are collected and the highest run number wins.
pub fn find_run_by_commit<'a, R: CommitEvidence>(
    history: &'a [R],
    target_sha: &str,
    max_depth: usize,
) -> Option<CommitMatch<'a, R>> {
    let mut matches: Vec<CommitMatch<'a, R>> = history
        .iter()
        .take(max_depth)
        .filter_map(|run| match_method(run, target_sha).map(|method| CommitMatch { run, method }))
        .collect();

    matches.sort_by_key(|m| m.run.run_number());
    let found = matches.pop();

    if let Some(found) = &found {
        log::debug!(
            "Commit {target_sha} matched run #{} by {}",
            found.run.run_number(),
            found.method
        );
    }
    found
}
