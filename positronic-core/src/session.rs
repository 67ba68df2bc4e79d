//! # session: one publish transaction on a dedicated branch
//!
//! A [`BranchSession`] forks a branch off the default branch, stages one commit per file on it,
//! records the updated checkpoint, opens a pull request and finally waits for the remote to
//! report the pull request mergeable before merging it and deleting the branch.
//!
//! ```text
//! Unstarted -> Started -> Staged* -> CheckpointWritten -> PullRequestOpened -> Merged
//!                  \__________\_______________\___________________\________-> Abandoned
//! ```
//!
//! Any failed remote call abandons the session. Nothing is rolled back: the branch, the files
//! already committed on it and an opened pull request stay on the remote for inspection.
//!
//! Writes rejected with a version conflict (HTTP 409) are retried exactly once after
//! [`SessionOptions::conflict_retry_delay`]; a second conflict abandons the session.
//!
//! All operations are ordinary futures. Dropping one (for instance from a `tokio::select!` on
//! ctrl-c) cancels it at its next await point, leaving the remote as it is.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::contract::{Committer, FileWrite, NewPullRequest, PullRequest, RepositoryApi};
use crate::error::{ApiError, PublishError};

/// Suffix of every branch created by a session.
pub const BRANCH_SUFFIX: &str = "-positronic";

pub const DEFAULT_CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Deterministic branch name for a session anchored at `at`.
pub fn branch_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}{}{BRANCH_SUFFIX}", at.format("%Y-%m-%dT%H%M"))
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Branch the session forks from and merges back into.
    pub default_branch: String,
    /// Prepended to the branch name; lets concurrent test runs stay apart.
    pub branch_prefix: String,
    pub committer: Committer,
    pub conflict_retry_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            branch_prefix: String::new(),
            committer: Committer::default(),
            conflict_retry_delay: DEFAULT_CONFLICT_RETRY_DELAY,
        }
    }
}

/// Linear backoff for [`BranchSession::wait_and_merge`]: the n-th poll waits `n * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub step: Duration,
    pub max_attempts: u32,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Started,
    Staged,
    CheckpointWritten,
    PullRequestOpened { number: u64 },
    Merged,
    Abandoned,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unstarted => write!(f, "unstarted"),
            SessionState::Started => write!(f, "started"),
            SessionState::Staged => write!(f, "staged"),
            SessionState::CheckpointWritten => write!(f, "checkpoint-written"),
            SessionState::PullRequestOpened { number } => write!(f, "pr-opened(#{number})"),
            SessionState::Merged => write!(f, "merged"),
            SessionState::Abandoned => write!(f, "abandoned"),
        }
    }
}

pub struct BranchSession<'a, R: RepositoryApi + ?Sized> {
    repo: &'a R,
    options: SessionOptions,
    branch: String,
    staged: Vec<String>,
    pull_request: Option<PullRequest>,
    state: SessionState,
}

impl<'a, R: RepositoryApi + ?Sized> BranchSession<'a, R> {
    pub fn new(repo: &'a R, options: SessionOptions) -> Self {
        Self {
            repo,
            options,
            branch: String::new(),
            staged: Vec::new(),
            pull_request: None,
            state: SessionState::Unstarted,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Empty until [`BranchSession::start`] succeeded.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base(&self) -> &str {
        &self.options.default_branch
    }

    /// Paths committed on the branch so far, in order.
    pub fn staged(&self) -> &[String] {
        &self.staged
    }

    pub fn pull_request(&self) -> Option<&PullRequest> {
        self.pull_request.as_ref()
    }

    fn ensure(
        &self,
        operation: &'static str,
        allowed: impl Fn(&SessionState) -> bool,
    ) -> Result<(), PublishError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(PublishError::InvalidState {
                branch: self.branch.clone(),
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn abandon(&mut self, operation: &'static str, err: ApiError) -> PublishError {
        error!(
            branch = %self.branch,
            operation,
            state = %self.state,
            error = %err,
            "[SESSION][ERROR] Abandoning branch session"
        );
        self.state = SessionState::Abandoned;
        PublishError::Api(err)
    }

    /// Creates the session branch at the current tip of the default branch.
    pub async fn start(&mut self, at: DateTime<Utc>) -> Result<(), PublishError> {
        self.ensure("start", |s| *s == SessionState::Unstarted)?;
        let name = branch_name(&self.options.branch_prefix, at);

        let base = match self.repo.get_ref(&self.options.default_branch).await {
            Ok(r) => r,
            Err(e) => return Err(self.abandon("start", e)),
        };
        if let Err(e) = self.repo.create_ref(&name, &base.sha).await {
            self.branch = name;
            return Err(self.abandon("start", e));
        }

        info!(branch = %name, base = %base.name, sha = %base.sha, "[SESSION] Started branch");
        self.branch = name;
        self.state = SessionState::Started;
        Ok(())
    }

    /// Commits a new file on the branch.
    pub async fn stage(
        &mut self,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<(), PublishError> {
        self.ensure("stage", |s| {
            matches!(s, SessionState::Started | SessionState::Staged)
        })?;
        self.commit("stage", path, content, message, None).await?;
        self.state = SessionState::Staged;
        Ok(())
    }

    /// Commits a new version of an existing file, conditioned on its current blob `sha`.
    pub async fn update(
        &mut self,
        path: &str,
        content: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), PublishError> {
        self.ensure("update", |s| {
            matches!(s, SessionState::Started | SessionState::Staged)
        })?;
        self.commit("update", path, content, message, Some(sha.to_string()))
            .await?;
        self.state = SessionState::Staged;
        Ok(())
    }

    /// Commits the checkpoint file: created when `prior_sha` is `None`, updated otherwise.
    /// Must come after every document and before the pull request.
    pub async fn record_checkpoint(
        &mut self,
        path: &str,
        content: &str,
        prior_sha: Option<&str>,
        message: &str,
    ) -> Result<(), PublishError> {
        self.ensure("record checkpoint", |s| {
            matches!(s, SessionState::Started | SessionState::Staged)
        })?;
        self.commit(
            "record checkpoint",
            path,
            content,
            message,
            prior_sha.map(str::to_string),
        )
        .await?;
        self.state = SessionState::CheckpointWritten;
        Ok(())
    }

    async fn commit(
        &mut self,
        operation: &'static str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<String>,
    ) -> Result<(), PublishError> {
        let write = FileWrite {
            branch: self.branch.clone(),
            path: path.to_string(),
            content: content.to_string(),
            message: message.to_string(),
            sha,
            committer: self.options.committer.clone(),
        };
        match self.put_with_conflict_retry(write).await {
            Ok(()) => {
                info!(branch = %self.branch, path, operation, "[SESSION] Committed file");
                self.staged.push(path.to_string());
                Ok(())
            }
            Err(e) => Err(self.abandon(operation, e)),
        }
    }

    /// The remote occasionally answers 409 on writes that succeed when replayed; replay once.
    async fn put_with_conflict_retry(&self, write: FileWrite) -> Result<(), ApiError> {
        match self.repo.put_file(write.clone()).await {
            Err(e) if e.is_conflict() => {
                warn!(
                    path = %write.path,
                    branch = %write.branch,
                    delay_secs = self.options.conflict_retry_delay.as_secs_f64(),
                    error = %e,
                    "[SESSION] Conflict on write, retrying once"
                );
                tokio::time::sleep(self.options.conflict_retry_delay).await;
                self.repo.put_file(write).await
            }
            other => other,
        }
    }

    /// Opens the pull request from the session branch into the default branch.
    pub async fn open_pull_request(
        &mut self,
        title: &str,
        body: &str,
    ) -> Result<&PullRequest, PublishError> {
        self.ensure("open pull request", |s| {
            matches!(s, SessionState::Staged | SessionState::CheckpointWritten)
        })?;
        let request = NewPullRequest {
            title: title.to_string(),
            body: body.to_string(),
            head: self.branch.clone(),
            base: self.options.default_branch.clone(),
        };
        let pr = match self.repo.create_pull_request(request).await {
            Ok(pr) => pr,
            Err(e) => return Err(self.abandon("open pull request", e)),
        };
        info!(
            branch = %self.branch,
            number = pr.number,
            url = %pr.html_url,
            files = self.staged.len(),
            "[SESSION] Opened pull request"
        );
        self.state = SessionState::PullRequestOpened { number: pr.number };
        Ok(self.pull_request.insert(pr))
    }

    /// Polls the pull request until it is mergeable, merges it and deletes the branch.
    pub async fn wait_and_merge(&mut self, policy: MergePolicy) -> Result<(), PublishError> {
        self.ensure("merge", |s| {
            matches!(s, SessionState::PullRequestOpened { .. })
        })?;
        let Some(mut pr) = self.pull_request.clone() else {
            return Err(PublishError::InvalidState {
                branch: self.branch.clone(),
                operation: "merge",
                state: self.state.to_string(),
            });
        };

        let mut attempt: u32 = 0;
        while !pr.is_mergeable() {
            if attempt >= policy.max_attempts {
                error!(
                    number = pr.number,
                    attempts = attempt,
                    "[SESSION][ERROR] Pull request never became mergeable"
                );
                self.state = SessionState::Abandoned;
                return Err(PublishError::MergeTimeout {
                    number: pr.number,
                    attempts: attempt,
                });
            }
            attempt += 1;
            info!(
                number = pr.number,
                attempt,
                mergeable = ?pr.mergeable,
                "[SESSION] Pull request not mergeable yet"
            );
            tokio::time::sleep(policy.step * attempt).await;
            pr = match self.repo.get_pull_request(pr.number).await {
                Ok(pr) => pr,
                Err(e) => return Err(self.abandon("poll pull request", e)),
            };
        }

        if let Err(e) = self.repo.merge_pull_request(pr.number).await {
            return Err(self.abandon("merge", e));
        }
        info!(number = pr.number, "[SESSION] Merged pull request");
        self.pull_request = Some(pr);

        if let Err(e) = self.repo.delete_ref(&self.branch).await {
            return Err(self.abandon("delete branch", e));
        }
        info!(branch = %self.branch, "[SESSION] Deleted branch");
        self.state = SessionState::Merged;
        Ok(())
    }
}
