//! Error types shared by the positronic-core clients and pipeline.

use thiserror::Error;

/// Failure of a single call against a remote API (GitHub or NewsBlur).
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote rejected a write because the version token was stale (HTTP 409).
    #[error("conflict on {url}: {body}")]
    Conflict { url: String, body: String },

    /// The requested resource does not exist (HTTP 404, or a path missing from a tree).
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Any other non-success status.
    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// The remote accepted the credentials exchange but reports an unauthenticated session.
    #[error("not authenticated against {service}")]
    Unauthenticated { service: &'static str },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// The stored watermark could not be decoded with either known encoding.
#[derive(Debug, Error)]
#[error("undecodable checkpoint {content:?}: not JSON ({structured}), not legacy ({legacy})")]
pub struct CheckpointError {
    pub content: String,
    pub structured: String,
    pub legacy: chrono::ParseError,
}

/// Errors aborting a publish run.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("remote api error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A branch session operation was attempted from a state that does not allow it.
    #[error("branch session {branch:?} cannot {operation} while {state}")]
    InvalidState {
        branch: String,
        operation: &'static str,
        state: String,
    },

    /// The pull request never became mergeable within the configured attempts.
    #[error("pull request #{number} not mergeable after {attempts} attempts")]
    MergeTimeout { number: u64, attempts: u32 },

    #[error("could not encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}
