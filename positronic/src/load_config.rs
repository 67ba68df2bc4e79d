/// `load_config` module: reads the static YAML config and the secrets from the environment,
/// and maps both onto the core [`PublishConfig`].
///
/// This is the only place where the user-supplied YAML is parsed. Secrets (API token, NewsBlur
/// credentials) never live in the file; they come from `POSITRONIC_*` environment variables,
/// which `main` may have populated from a `.env` file.
///
/// # Accepted YAML
/// ```yaml
/// repository: owner/blog            # required
/// content_path: content/tldr        # required
/// checkpoint_path: content/checkpoint  # required
/// default_branch: main
/// initial_checkpoint: 2020-01-01T00:00:00Z
/// branch_prefix: ""
/// skip_merge: false
/// dry_run: false
/// committer: { name: positronic, email: positronic@users.noreply.github.com }
/// merge: { step_secs: 1, max_attempts: 30 }
/// conflict_retry_secs: 10
/// api_interval_ms: 720
/// newsblur_base_url: https://newsblur.com
/// github_base_url: https://api.github.com
/// ```
///
/// # Errors
/// All errors are `anyhow::Error` with the offending path or variable in the message.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use positronic_core::config::PublishConfig;
use positronic_core::contract::Committer;
use positronic_core::github::{RepoSlug, DEFAULT_API_URL};
use positronic_core::newsblur::DEFAULT_BASE_URL;
use positronic_core::session::{MergePolicy, SessionOptions};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

pub const GITHUB_TOKEN_VAR: &str = "POSITRONIC_GITHUB_TOKEN";
pub const NEWSBLUR_USERNAME_VAR: &str = "POSITRONIC_NEWSBLUR_USERNAME";
pub const NEWSBLUR_PASSWORD_VAR: &str = "POSITRONIC_NEWSBLUR_PASSWORD";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub repository: String,
    pub content_path: String,
    pub checkpoint_path: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub initial_checkpoint: Option<DateTime<Utc>>,
    #[serde(default)]
    pub branch_prefix: String,
    #[serde(default)]
    pub skip_merge: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub committer: Committer,
    #[serde(default)]
    pub merge: MergeSection,
    #[serde(default = "default_conflict_retry_secs")]
    pub conflict_retry_secs: u64,
    #[serde(default = "default_api_interval_ms")]
    pub api_interval_ms: u64,
    #[serde(default = "default_newsblur_base_url")]
    pub newsblur_base_url: String,
    #[serde(default = "default_github_base_url")]
    pub github_base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeSection {
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_step_secs() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    30
}

fn default_conflict_retry_secs() -> u64 {
    10
}

fn default_api_interval_ms() -> u64 {
    720
}

fn default_newsblur_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_github_base_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl CliConfig {
    pub fn slug(&self) -> Result<RepoSlug> {
        self.repository
            .parse()
            .map_err(|e: String| anyhow!("Invalid repository in config: {e}"))
    }

    pub fn api_interval(&self) -> Duration {
        Duration::from_millis(self.api_interval_ms)
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            content_path: self.content_path.clone(),
            checkpoint_path: self.checkpoint_path.clone(),
            initial_checkpoint: self.initial_checkpoint,
            skip_merge: self.skip_merge,
            dry_run: self.dry_run,
            session: SessionOptions {
                default_branch: self.default_branch.clone(),
                branch_prefix: self.branch_prefix.clone(),
                committer: self.committer.clone(),
                conflict_retry_delay: Duration::from_secs(self.conflict_retry_secs),
            },
            merge: MergePolicy {
                step: Duration::from_secs(self.merge.step_secs),
                max_attempts: self.merge.max_attempts,
            },
        }
    }
}

/// Secrets read from the environment. `Debug` never prints them.
pub struct Credentials {
    pub github_token: String,
    pub newsblur_username: String,
    pub newsblur_password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"<redacted>")
            .field("newsblur_username", &self.newsblur_username)
            .field("newsblur_password", &"<redacted>")
            .finish()
    }
}

fn required_var(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => {
            error!(var = name, "Environment variable is empty");
            Err(anyhow!("Environment variable {name} is empty"))
        }
        Err(e) => {
            error!(var = name, error = ?e, "Environment variable missing");
            Err(anyhow!("Environment variable {name} must be set: {e}"))
        }
    }
}

impl Credentials {
    pub fn github_from_env() -> Result<String> {
        required_var(GITHUB_TOKEN_VAR)
    }

    pub fn from_env() -> Result<Self> {
        let creds = Credentials {
            github_token: Self::github_from_env()?,
            newsblur_username: required_var(NEWSBLUR_USERNAME_VAR)?,
            newsblur_password: required_var(NEWSBLUR_PASSWORD_VAR)?,
        };
        debug!(?creds, "Credentials loaded from environment");
        Ok(creds)
    }
}

/// Loads the YAML config at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let config: CliConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML: {e}")
    })?;
    config
        .slug()
        .with_context(|| format!("Config file {path_ref:?}"))?;

    info!(
        config_path = ?path_ref,
        repository = %config.repository,
        "Parsed config YAML successfully"
    );
    Ok(config)
}
