//! NewsBlur client: session login and the paginated "shared stories" feed.
//!
//! Login exchanges a username/password for a session cookie kept in the client's cookie store;
//! every later request rides on that cookie. All calls are paced through the injected
//! [`RateLimiter`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::contract::{ContentSource, Story};
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

pub const DEFAULT_BASE_URL: &str = "https://newsblur.com";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    user_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StoriesResponse {
    #[serde(default)]
    stories: Vec<Story>,
}

pub struct NewsblurClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    user_id: u64,
}

impl NewsblurClient {
    /// Logs in and returns a client bound to the authenticated user's shared feed.
    pub async fn login(
        base_url: &str,
        username: &str,
        password: &str,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!("positronic/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let url = format!("{base_url}/api/login");

        tracing::info!(
            url = %url,
            username,
            interval_ms = limiter.period().as_millis() as u64,
            "Logging in to NewsBlur"
        );
        limiter.acquire().await;
        let resp = http
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::error!(status = %status, url = %url, "NewsBlur login rejected");
            return Err(ApiError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let login = parse_login(&body)?;
        tracing::info!(user_id = login, "NewsBlur login succeeded");
        Ok(Self {
            http,
            limiter,
            base_url,
            user_id: login,
        })
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }
}

fn parse_login(body: &str) -> Result<u64, ApiError> {
    let login: LoginResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Decode(format!("login response: {e}")))?;
    match (login.authenticated, login.user_id) {
        (true, Some(user_id)) => Ok(user_id),
        _ => Err(ApiError::Unauthenticated { service: "newsblur" }),
    }
}

fn stories_url(base_url: &str, user_id: u64, page: u32) -> String {
    format!("{base_url}/social/stories/{user_id}/?page={page}&order=newest&read_filter=all")
}

#[async_trait]
impl ContentSource for NewsblurClient {
    async fn shared_stories(&self, page: u32) -> Result<Vec<Story>, ApiError> {
        let url = stories_url(&self.base_url, self.user_id, page);
        tracing::debug!(page, url = %url, "Fetching shared stories");

        self.limiter.acquire().await;
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::error!(
                status = %status,
                page,
                "NewsBlur returned an error for shared stories"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let parsed: StoriesResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("shared stories page {page}: {e}")))?;
        tracing::info!(page, count = parsed.stories.len(), "Fetched shared stories page");
        Ok(parsed.stories)
    }
}
