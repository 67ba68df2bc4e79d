//! # contract: interfaces to the two remote systems
//!
//! This module defines the traits the publish pipeline is written against, together with the
//! plain data types that cross them:
//!
//! - [`ContentSource`]: the paginated feed of shared stories (NewsBlur in production).
//! - [`RepositoryApi`]: the hosted-repository operations needed to stage files on a branch,
//!   open a pull request and merge it (GitHub in production).
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; the generated `MockContentSource` and
//!   `MockRepositoryApi` are exported under the `test-export-mocks` feature so integration tests
//!   can drive the pipeline deterministically.
//!
//! ## Implementations
//! - [`crate::newsblur::NewsblurClient`] and [`crate::github::GithubClient`] are the networked
//!   implementations. Both pace their calls through a shared [`crate::rate_limit::RateLimiter`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::ApiError;

/// Timestamp layout of NewsBlur's `shared_date` field, also the legacy checkpoint encoding.
pub const NEWSBLUR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parses a timestamp in [`NEWSBLUR_TIME_FORMAT`], interpreted as UTC.
pub fn parse_newsblur_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, NEWSBLUR_TIME_FORMAT).map(|naive| naive.and_utc())
}

fn deserialize_shared_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_newsblur_time(&raw).map_err(|e| {
        serde::de::Error::custom(format!("invalid shared_date {raw:?}: {e}"))
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One shared story. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "story_title")]
    pub title: String,
    #[serde(rename = "story_permalink")]
    pub permalink: String,
    #[serde(rename = "comments", default, deserialize_with = "null_as_empty")]
    pub comment: String,
    /// Ordering key: when the story was shared.
    #[serde(deserialize_with = "deserialize_shared_date")]
    pub shared_date: DateTime<Utc>,
}

/// A paginated, newest-first feed of shared stories.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch one page of shared stories. Pages are 1-indexed; an empty page marks the end.
    async fn shared_stories(&self, page: u32) -> Result<Vec<Story>, ApiError>;
}

/// A git reference and the commit it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    /// Fully qualified name, e.g. `refs/heads/main`.
    pub name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

/// One entry of a (non-recursive) git tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub sha: String,
}

/// File content together with its blob SHA (the version token for updates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub sha: String,
    pub content: String,
}

/// Name and email recorded as committer on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Default for Committer {
    fn default() -> Self {
        Self {
            name: "positronic".to_string(),
            email: "positronic@users.noreply.github.com".to_string(),
        }
    }
}

/// A single-file commit on a branch. `sha` set means "update the file at this version".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    pub sha: Option<String>,
    pub committer: Committer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Branch carrying the changes.
    pub head: String,
    /// Branch the changes are merged into.
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    /// `None` while the remote is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub html_url: String,
}

impl PullRequest {
    pub fn is_mergeable(&self) -> bool {
        self.mergeable == Some(true)
    }
}

/// Operations on the destination repository.
///
/// Every implementation call is one remote round trip; callers never batch.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Resolve a branch (short name, e.g. `main`) to its tip.
    async fn get_ref(&self, branch: &str) -> Result<GitRef, ApiError>;

    /// List the entries of the tree with the given SHA (a commit SHA resolves to its root tree).
    async fn get_tree(&self, sha: &str) -> Result<Vec<TreeEntry>, ApiError>;

    /// Fetch and decode a blob.
    async fn get_blob(&self, sha: &str) -> Result<Blob, ApiError>;

    /// Create `refs/heads/<branch>` pointing at `sha`.
    async fn create_ref(&self, branch: &str, sha: &str) -> Result<GitRef, ApiError>;

    /// Create or conditionally update one file. A stale `sha` yields [`ApiError::Conflict`].
    async fn put_file(&self, write: FileWrite) -> Result<(), ApiError>;

    async fn create_pull_request(&self, request: NewPullRequest) -> Result<PullRequest, ApiError>;

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, ApiError>;

    async fn merge_pull_request(&self, number: u64) -> Result<(), ApiError>;

    /// Delete `refs/heads/<branch>`.
    async fn delete_ref(&self, branch: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn story_decodes_newsblur_fields() {
        let raw = r#"{
            "id": "abc123",
            "story_title": "Rust 2024",
            "story_permalink": "https://example.com/rust",
            "comments": "worth a read",
            "shared_date": "2024-01-03 10:20:30.123456"
        }"#;
        let story: Story = serde_json::from_str(raw).unwrap();
        assert_eq!(story.id, "abc123");
        assert_eq!(story.title, "Rust 2024");
        assert_eq!(story.comment, "worth a read");
        let expected = Utc.with_ymd_and_hms(2024, 1, 3, 10, 20, 30).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(story.shared_date, expected);
    }

    #[test]
    fn story_with_null_comment_is_empty() {
        let raw = r#"{
            "story_title": "t",
            "story_permalink": "u",
            "comments": null,
            "shared_date": "2024-01-03 10:20:30"
        }"#;
        let story: Story = serde_json::from_str(raw).unwrap();
        assert_eq!(story.comment, "");
        assert_eq!(story.id, "");
    }

    #[test]
    fn story_with_bad_date_fails() {
        let raw = r#"{"story_title":"t","story_permalink":"u","shared_date":"yesterday"}"#;
        let err = serde_json::from_str::<Story>(raw).unwrap_err();
        assert!(err.to_string().contains("shared_date"));
    }
}
