//! Watermark persisted as a file in the destination repository.
//!
//! The file holds a JSON-encoded RFC 3339 timestamp. Older deployments wrote the NewsBlur
//! timestamp layout as plain text; both are accepted on read, only JSON is written.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::contract::{parse_newsblur_time, EntryKind, RepositoryApi};
use crate::error::{ApiError, CheckpointError, PublishError};
use crate::session::BranchSession;

pub const CHECKPOINT_COMMIT_MESSAGE: &str = "auto: checkpoint";

/// The watermark as read from the default branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Everything shared at or before this instant has been published.
    pub at: Option<DateTime<Utc>>,
    /// Blob SHA of the checkpoint file; `None` when the file does not exist yet.
    pub sha: Option<String>,
}

/// Decodes stored checkpoint content. Empty content means "no watermark".
pub fn decode(content: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let structured = match serde_json::from_str::<DateTime<Utc>>(trimmed) {
        Ok(at) => return Ok(Some(at)),
        Err(e) => e,
    };
    debug!(error = %structured, "Checkpoint is not JSON, trying legacy format");
    parse_newsblur_time(trimmed)
        .map(Some)
        .map_err(|legacy| CheckpointError {
            content: content.to_string(),
            structured: structured.to_string(),
            legacy,
        })
}

pub fn encode(at: DateTime<Utc>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&at)
}

pub struct CheckpointStore<'a, R: RepositoryApi + ?Sized> {
    repo: &'a R,
    default_branch: String,
}

impl<'a, R: RepositoryApi + ?Sized> CheckpointStore<'a, R> {
    pub fn new(repo: &'a R, default_branch: &str) -> Self {
        Self {
            repo,
            default_branch: default_branch.to_string(),
        }
    }

    /// Reads the checkpoint at `path` on the default branch. A missing file is not an error.
    pub async fn read(&self, path: &str) -> Result<Checkpoint, PublishError> {
        let Some(blob) = self.find_blob(path).await? else {
            info!(path, "No checkpoint file, full resync");
            return Ok(Checkpoint::default());
        };
        let content = match self.repo.get_blob(&blob).await {
            Ok(blob) => blob,
            Err(e) if e.is_not_found() => {
                warn!(path, sha = %blob, "Checkpoint blob vanished, full resync");
                return Ok(Checkpoint::default());
            }
            Err(e) => return Err(e.into()),
        };
        let at = decode(&content.content)?;
        info!(path, sha = %content.sha, checkpoint = ?at, "Read checkpoint");
        Ok(Checkpoint {
            at,
            sha: Some(content.sha),
        })
    }

    /// Walks the tree of the default branch down to `path`, returning the blob SHA.
    async fn find_blob(&self, path: &str) -> Result<Option<String>, ApiError> {
        let tip = self.repo.get_ref(&self.default_branch).await?;
        let mut tree = self.repo.get_tree(&tip.sha).await?;

        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        for (i, component) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            let Some(entry) = tree.iter().find(|e| e.path == *component) else {
                return Ok(None);
            };
            match (entry.kind, last) {
                (EntryKind::Blob, true) => return Ok(Some(entry.sha.clone())),
                (EntryKind::Tree, false) => {
                    let sha = entry.sha.clone();
                    tree = match self.repo.get_tree(&sha).await {
                        Ok(tree) => tree,
                        Err(e) if e.is_not_found() => return Ok(None),
                        Err(e) => return Err(e),
                    };
                }
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Commits `at` onto the session branch, conditioned on `prior_sha` when the file exists.
    pub async fn write<S: RepositoryApi + ?Sized>(
        &self,
        session: &mut BranchSession<'_, S>,
        path: &str,
        at: DateTime<Utc>,
        prior_sha: Option<&str>,
    ) -> Result<(), PublishError> {
        let content = encode(at)?;
        session
            .record_checkpoint(path, &content, prior_sha, CHECKPOINT_COMMIT_MESSAGE)
            .await?;
        info!(path, checkpoint = %at, update = prior_sha.is_some(), "Wrote checkpoint");
        Ok(())
    }
}
