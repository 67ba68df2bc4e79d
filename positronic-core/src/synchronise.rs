//! High-level pipeline: read watermark → iterate shared stories → publish on a branch.
//!
//! One call to [`synchronise`] is one run. It:
//!   - Reads the checkpoint from the default branch and clamps it to the configured minimum
//!   - Walks the shared-stories feed newest first, stopping at the watermark
//!   - Renders every story into a document and commits it on a fresh branch (started lazily,
//!     so a run without new stories performs no remote writes besides the checkpoint read)
//!   - Records the newest shared date as the new checkpoint on the same branch
//!   - Opens a pull request and, unless `skip_merge` is set, waits for it to become mergeable,
//!     merges it and deletes the branch
//!
//! [`publish_link`] is the single-document variant behind the `post` command: no feed, no
//! checkpoint, one curated link.
//!
//! # Error Handling
//! Fail-fast: the first error aborts the run and is returned as-is. Whatever was already
//! committed stays on the branch; re-running republishes everything after the old watermark.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointStore, CHECKPOINT_COMMIT_MESSAGE};
use crate::config::PublishConfig;
use crate::contract::{ContentSource, PullRequest, RepositoryApi};
use crate::error::PublishError;
use crate::render::{join_path, Document, Post};
use crate::session::{BranchSession, BRANCH_SUFFIX};
use crate::stories::SharedStories;

pub const PULL_REQUEST_BODY: &str = "Automated publication of newly shared stories.";
pub const LINK_PULL_REQUEST_BODY: &str = "Automated publication of a curated link.";

/// What a run did (or, for a dry run, would have done).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynchroniseReport {
    /// Watermark the run started from, after clamping.
    pub previous_checkpoint: Option<DateTime<Utc>>,
    /// Watermark written by the run; `None` when it did not move.
    pub new_checkpoint: Option<DateTime<Utc>>,
    /// Repository paths of the published documents, newest first.
    pub documents: Vec<String>,
    pub branch: Option<String>,
    /// Set once a pull request was opened, merged or not.
    pub pull_request: Option<PullRequest>,
    pub merged: bool,
    pub dry_run: bool,
}

impl SynchroniseReport {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn trace(&self) {
        info!(
            previous_checkpoint = ?self.previous_checkpoint,
            new_checkpoint = ?self.new_checkpoint,
            documents = self.documents.len(),
            branch = ?self.branch,
            pull_request = ?self.pull_request.as_ref().map(|pr| pr.number),
            merged = self.merged,
            dry_run = self.dry_run,
            "[SYNC] Run report"
        );
    }
}

/// Title of the pull request of a run anchored at `at`.
pub fn pull_request_title(prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{prefix}{}{BRANCH_SUFFIX}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Renders `post`, falling back to the hash-suffixed filename when the path was already taken
/// earlier in the same run. Items sharing an id share the hash, so a counter follows until the
/// path is free.
fn render_unique(post: &Post, content_dir: &str, taken: &mut HashSet<String>) -> Document {
    let mut document = post.render(content_dir);
    if taken.insert(document.path.clone()) {
        return document;
    }

    let hashed = post.disambiguated_file_name();
    let stem = hashed.trim_end_matches(".md");
    let mut path = join_path(content_dir, &hashed);
    let mut counter = 2u32;
    while !taken.insert(path.clone()) {
        path = join_path(content_dir, &format!("{stem}-{counter}.md"));
        counter += 1;
    }
    warn!(
        collided = %document.path,
        path = %path,
        id = %post.id,
        "[SYNC] Filename collision, disambiguating"
    );
    document.path = path;
    document
}

fn file_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub async fn synchronise<S, R>(
    config: &PublishConfig,
    source: &S,
    repo: &R,
) -> Result<SynchroniseReport, PublishError>
where
    S: ContentSource + ?Sized,
    R: RepositoryApi + ?Sized,
{
    info!(dry_run = config.dry_run, "[SYNC] Starting synchronisation run");

    let store = CheckpointStore::new(repo, &config.session.default_branch);
    let checkpoint = store.read(&config.checkpoint_path).await.map_err(|e| {
        error!(
            error = %e,
            path = %config.checkpoint_path,
            "[SYNC][ERROR] Reading checkpoint failed"
        );
        e
    })?;
    let watermark = config.effective_watermark(checkpoint.at);
    if watermark != checkpoint.at {
        info!(
            stored = ?checkpoint.at,
            clamped = ?watermark,
            "[SYNC] Checkpoint clamped to initial checkpoint"
        );
    }

    let mut report = SynchroniseReport {
        previous_checkpoint: watermark,
        dry_run: config.dry_run,
        ..Default::default()
    };
    let anchor = watermark.unwrap_or_else(Utc::now);

    let mut stories = SharedStories::new(source, watermark);
    let mut session: Option<BranchSession<'_, R>> = None;
    let mut taken = HashSet::new();
    let mut newest = watermark;

    while let Some(story) = stories.next().await? {
        let post = Post::from(&story);
        let document = render_unique(&post, &config.content_path, &mut taken);
        let message = format!("auto: new short post {} [skip ci]", file_of(&document.path));

        if config.dry_run {
            info!(
                path = %document.path,
                title = %post.title,
                shared_date = %post.date,
                "[SYNC][DRY-RUN] Would publish document"
            );
        } else {
            if session.is_none() {
                let mut started = BranchSession::new(repo, config.session.clone());
                started.start(anchor).await?;
                session = Some(started);
            }
            if let Some(session) = session.as_mut() {
                session.stage(&document.path, &document.body, &message).await?;
            }
            info!(path = %document.path, title = %post.title, "[SYNC] Staged document");
        }

        if newest.map_or(true, |n| post.date > n) {
            newest = Some(post.date);
        }
        report.documents.push(document.path);
    }
    info!(
        documents = report.documents.len(),
        pages = stories.pages_fetched(),
        "[SYNC] Reached end of new stories"
    );

    let new_checkpoint =
        newest.filter(|n| Some(*n) != checkpoint.at && !report.documents.is_empty());

    if config.dry_run {
        if let Some(at) = new_checkpoint {
            info!(
                path = %config.checkpoint_path,
                checkpoint = %at,
                message = CHECKPOINT_COMMIT_MESSAGE,
                "[SYNC][DRY-RUN] Would write checkpoint"
            );
        }
        report.new_checkpoint = new_checkpoint;
        report.trace();
        return Ok(report);
    }

    let Some(mut session) = session else {
        info!("[SYNC] No new stories, nothing to publish");
        report.trace();
        return Ok(report);
    };
    report.branch = Some(session.branch().to_string());

    if let Some(at) = new_checkpoint {
        store
            .write(&mut session, &config.checkpoint_path, at, checkpoint.sha.as_deref())
            .await?;
        report.new_checkpoint = Some(at);
    }

    let title = pull_request_title(&config.session.branch_prefix, anchor);
    finish(config, &mut session, &title, PULL_REQUEST_BODY, &mut report).await?;
    report.trace();
    Ok(report)
}

/// Publishes one curated link on its own branch. The checkpoint is left alone.
pub async fn publish_link<R>(
    config: &PublishConfig,
    repo: &R,
    post: &Post,
) -> Result<SynchroniseReport, PublishError>
where
    R: RepositoryApi + ?Sized,
{
    let document = post.render(&config.content_path);
    let message = format!("auto: new curated link {}", file_of(&document.path));
    let mut report = SynchroniseReport {
        dry_run: config.dry_run,
        documents: vec![document.path.clone()],
        ..Default::default()
    };

    if config.dry_run {
        info!(
            path = %document.path,
            title = %post.title,
            url = %post.url,
            "[SYNC][DRY-RUN] Would publish curated link"
        );
        report.trace();
        return Ok(report);
    }

    let mut session = BranchSession::new(repo, config.session.clone());
    session.start(post.date).await?;
    report.branch = Some(session.branch().to_string());
    session.stage(&document.path, &document.body, &message).await?;
    info!(path = %document.path, title = %post.title, "[SYNC] Staged curated link");

    let title = pull_request_title(&config.session.branch_prefix, post.date);
    finish(config, &mut session, &title, LINK_PULL_REQUEST_BODY, &mut report).await?;
    report.trace();
    Ok(report)
}

async fn finish<R>(
    config: &PublishConfig,
    session: &mut BranchSession<'_, R>,
    title: &str,
    body: &str,
    report: &mut SynchroniseReport,
) -> Result<(), PublishError>
where
    R: RepositoryApi + ?Sized,
{
    let pr = session.open_pull_request(title, body).await?.clone();
    info!(
        number = pr.number,
        url = %pr.html_url,
        head = %session.branch(),
        base = %session.base(),
        "[SYNC] Pull request opened"
    );
    report.pull_request = Some(pr.clone());

    if config.skip_merge {
        info!(number = pr.number, "[SYNC] Skipping merge as configured");
        return Ok(());
    }

    if let Err(e) = session.wait_and_merge(config.merge).await {
        error!(
            number = pr.number,
            url = %pr.html_url,
            branch = %session.branch(),
            error = %e,
            "[SYNC][ERROR] Pull request left open"
        );
        return Err(e);
    }
    if let Some(merged) = session.pull_request() {
        report.pull_request = Some(merged.clone());
    }
    report.merged = true;
    Ok(())
}
