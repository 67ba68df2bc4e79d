//! GitHub REST client implementing [`RepositoryApi`].
//!
//! Thin: one method per endpoint, status codes mapped onto [`ApiError`] (404 → `NotFound`,
//! 409 → `Conflict`). Retries and sequencing live in [`crate::session`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::contract::{
    Blob, Committer, FileWrite, GitRef, NewPullRequest, PullRequest, RepositoryApi, TreeEntry,
};
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// `owner/repo` coordinates of the destination repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl std::str::FromStr for RepoSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(RepoSlug {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(format!("malformed repository {s:?}, expected owner/repo")),
        }
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Deserialize)]
struct RefResponse {
    #[serde(rename = "ref")]
    name: String,
    object: RefObject,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct BlobResponse {
    sha: String,
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Serialize)]
struct CreateRefBody<'a> {
    #[serde(rename = "ref")]
    name: &'a str,
    sha: &'a str,
}

#[derive(Serialize)]
struct PutContentsBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    committer: &'a Committer,
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

pub struct GithubClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    api_url: String,
    token: String,
    slug: RepoSlug,
}

impl GithubClient {
    pub fn new(
        api_url: &str,
        token: &str,
        slug: RepoSlug,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("positronic/", env!("CARGO_PKG_VERSION")))
            .build()?;
        tracing::info!(
            repository = %slug,
            api_url,
            token_set = !token.is_empty(),
            interval_ms = limiter.period().as_millis() as u64,
            "Initialized GitHub client"
        );
        Ok(Self {
            http,
            limiter,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            slug,
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url, self.slug.owner, self.slug.repo, suffix
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Paces, sends and maps the status; returns the raw body of a successful response.
    async fn send(
        &self,
        what: &str,
        url: &str,
        builder: RequestBuilder,
    ) -> Result<String, ApiError> {
        self.limiter.acquire().await;
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        match classify(status, url, what, body) {
            Ok(body) => {
                tracing::debug!(status, url, "GitHub call succeeded");
                Ok(body)
            }
            Err(e) => {
                tracing::warn!(status, url, error = %e, "GitHub call failed");
                Err(e)
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        what: &str,
        url: &str,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let body = self.send(what, url, builder).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
    }
}

fn classify(status: u16, url: &str, what: &str, body: String) -> Result<String, ApiError> {
    match status {
        200..=299 => Ok(body),
        404 => Err(ApiError::NotFound {
            what: what.to_string(),
        }),
        409 => Err(ApiError::Conflict {
            url: url.to_string(),
            body,
        }),
        _ => Err(ApiError::Status {
            status,
            url: url.to_string(),
            body,
        }),
    }
}

/// GitHub wraps base64 blob content at 60 columns.
fn decode_blob_content(raw: &str, encoding: &str) -> Result<String, ApiError> {
    if encoding != "base64" && !encoding.is_empty() {
        return Ok(raw.to_string());
    }
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ApiError::Decode(format!("blob content: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ApiError::Decode(format!("blob content is not utf-8: {e}")))
}

/// Percent-encodes each segment of a repository path, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl RepositoryApi for GithubClient {
    async fn get_ref(&self, branch: &str) -> Result<GitRef, ApiError> {
        let url = self.repo_url(&format!("git/ref/heads/{}", encode_path(branch)));
        let resp: RefResponse = self
            .send_json(&format!("ref heads/{branch}"), &url, self.request(Method::GET, &url))
            .await?;
        Ok(GitRef {
            name: resp.name,
            sha: resp.object.sha,
        })
    }

    async fn get_tree(&self, sha: &str) -> Result<Vec<TreeEntry>, ApiError> {
        let url = self.repo_url(&format!("git/trees/{sha}"));
        let resp: TreeResponse = self
            .send_json(&format!("tree {sha}"), &url, self.request(Method::GET, &url))
            .await?;
        Ok(resp.tree)
    }

    async fn get_blob(&self, sha: &str) -> Result<Blob, ApiError> {
        let url = self.repo_url(&format!("git/blobs/{sha}"));
        let resp: BlobResponse = self
            .send_json(&format!("blob {sha}"), &url, self.request(Method::GET, &url))
            .await?;
        Ok(Blob {
            content: decode_blob_content(&resp.content, &resp.encoding)?,
            sha: resp.sha,
        })
    }

    async fn create_ref(&self, branch: &str, sha: &str) -> Result<GitRef, ApiError> {
        let url = self.repo_url("git/refs");
        let name = format!("refs/heads/{branch}");
        tracing::info!(reference = %name, sha, "Creating ref");
        let builder = self
            .request(Method::POST, &url)
            .json(&CreateRefBody { name: &name, sha });
        let resp: RefResponse = self.send_json("create ref", &url, builder).await?;
        Ok(GitRef {
            name: resp.name,
            sha: resp.object.sha,
        })
    }

    async fn put_file(&self, write: FileWrite) -> Result<(), ApiError> {
        let url = self.repo_url(&format!("contents/{}", encode_path(&write.path)));
        tracing::info!(
            path = %write.path,
            branch = %write.branch,
            update = write.sha.is_some(),
            "Writing file"
        );
        let builder = self.request(Method::PUT, &url).json(&PutContentsBody {
            message: &write.message,
            content: STANDARD.encode(write.content.as_bytes()),
            branch: &write.branch,
            sha: write.sha.as_deref(),
            committer: &write.committer,
        });
        self.send(&format!("contents {}", write.path), &url, builder)
            .await
            .map(|_| ())
    }

    async fn create_pull_request(&self, request: NewPullRequest) -> Result<PullRequest, ApiError> {
        let url = self.repo_url("pulls");
        tracing::info!(
            head = %request.head,
            base = %request.base,
            title = %request.title,
            "Opening pull request"
        );
        let builder = self.request(Method::POST, &url).json(&CreatePullBody {
            title: &request.title,
            body: &request.body,
            head: &request.head,
            base: &request.base,
        });
        self.send_json("create pull request", &url, builder).await
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, ApiError> {
        let url = self.repo_url(&format!("pulls/{number}"));
        self.send_json(
            &format!("pull request #{number}"),
            &url,
            self.request(Method::GET, &url),
        )
        .await
    }

    async fn merge_pull_request(&self, number: u64) -> Result<(), ApiError> {
        let url = self.repo_url(&format!("pulls/{number}/merge"));
        tracing::info!(number, "Merging pull request");
        let builder = self
            .request(Method::PUT, &url)
            .json(&serde_json::json!({}));
        self.send(&format!("merge #{number}"), &url, builder)
            .await
            .map(|_| ())
    }

    async fn delete_ref(&self, branch: &str) -> Result<(), ApiError> {
        let url = self.repo_url(&format!("git/refs/heads/{}", encode_path(branch)));
        tracing::info!(branch, "Deleting branch");
        self.send(
            &format!("ref heads/{branch}"),
            &url,
            self.request(Method::DELETE, &url),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_slug_parses_owner_and_repo() {
        let slug: RepoSlug = "seriousben/seriousben.com".parse().unwrap();
        assert_eq!(slug.owner, "seriousben");
        assert_eq!(slug.repo, "seriousben.com");
        assert_eq!(slug.to_string(), "seriousben/seriousben.com");

        assert!("no-slash".parse::<RepoSlug>().is_err());
        assert!("a/b/c".parse::<RepoSlug>().is_err());
        assert!("/repo".parse::<RepoSlug>().is_err());
    }

    #[test]
    fn status_codes_map_to_api_errors() {
        assert_eq!(classify(201, "u", "w", "ok".into()).unwrap(), "ok");
        assert!(classify(404, "u", "w", String::new())
            .unwrap_err()
            .is_not_found());
        assert!(classify(409, "u", "w", String::new())
            .unwrap_err()
            .is_conflict());
        assert!(matches!(
            classify(422, "u", "w", "bad".into()),
            Err(ApiError::Status { status: 422, .. })
        ));
    }

    #[test]
    fn blob_content_ignores_line_wrapping() {
        let encoded = STANDARD.encode("\"2024-01-03T00:00:00Z\"");
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(
            decode_blob_content(&wrapped, "base64").unwrap(),
            "\"2024-01-03T00:00:00Z\""
        );
        assert_eq!(decode_blob_content("plain", "utf-8").unwrap(), "plain");
        assert!(decode_blob_content("@@@", "base64").is_err());
    }

    #[test]
    fn paths_are_percent_encoded_per_segment() {
        assert_eq!(
            encode_path("content/tldr/2024-01-03-rust.md"),
            "content/tldr/2024-01-03-rust.md"
        );
        assert_eq!(encode_path("a b/c#d"), "a%20b/c%23d");
        assert_eq!(
            encode_path("content/tldr/2024-01-03-café.md"),
            "content/tldr/2024-01-03-caf%C3%A9.md"
        );
    }
}
