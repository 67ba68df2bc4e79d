use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::session::{MergePolicy, SessionOptions};

/// Everything one publish run needs besides its two remotes.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Directory (in the destination repository) receiving the rendered documents.
    pub content_path: String,
    /// Repository path of the checkpoint file.
    pub checkpoint_path: String,
    /// Lower bound for the watermark; older or missing checkpoints are clamped up to it.
    pub initial_checkpoint: Option<DateTime<Utc>>,
    /// Open the pull request but do not wait for it or merge it.
    pub skip_merge: bool,
    /// Read and render only; log every write instead of performing it.
    pub dry_run: bool,
    pub session: SessionOptions,
    pub merge: MergePolicy,
}

impl PublishConfig {
    pub fn new(content_path: &str, checkpoint_path: &str) -> Self {
        Self {
            content_path: content_path.to_string(),
            checkpoint_path: checkpoint_path.to_string(),
            initial_checkpoint: None,
            skip_merge: false,
            dry_run: false,
            session: SessionOptions::default(),
            merge: MergePolicy::default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            content_path = %self.content_path,
            checkpoint_path = %self.checkpoint_path,
            initial_checkpoint = ?self.initial_checkpoint,
            default_branch = %self.session.default_branch,
            skip_merge = self.skip_merge,
            dry_run = self.dry_run,
            "Loaded publish config"
        );
        debug!(?self, "Publish config loaded (full debug)");
    }

    /// The watermark a run iterates from: the stored one, raised to `initial_checkpoint`.
    pub fn effective_watermark(&self, stored: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (stored, self.initial_checkpoint) {
            (Some(stored), Some(min)) => Some(stored.max(min)),
            (stored, min) => stored.or(min),
        }
    }
}
