//! # positronic CLI interface
//!
//! Command parsing and the glue between the loaded config, the environment secrets and the
//! pipelines in `positronic-core`. No publishing logic lives here.
//!
//! ## Commands
//! - `sync`: one synchronisation run, exits non-zero on failure.
//! - `poll`: a run every `--frequency-secs` until ctrl-c. Failed runs are logged and retried on
//!   the next tick; ctrl-c also aborts a run in flight.
//! - `post`: publish a single curated link without touching the checkpoint.
//!
//! [`run`] is the async entrypoint shared by `main` and the integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use positronic_core::config::PublishConfig;
use positronic_core::github::GithubClient;
use positronic_core::newsblur::NewsblurClient;
use positronic_core::rate_limit::RateLimiter;
use positronic_core::render::Post;
use positronic_core::synchronise::{publish_link, synchronise, SynchroniseReport};
use tracing::{error, info, warn};

use crate::load_config::{load_config, CliConfig, Credentials};

/// positronic: republish NewsBlur shared stories into a Hugo blog on GitHub.
#[derive(Parser)]
#[clap(
    name = "positronic",
    version,
    about = "Publish NewsBlur shared stories to a GitHub-hosted blog through pull requests"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct RunOptions {
    /// Path to the YAML config file
    #[clap(long, env = "POSITRONIC_CONFIG")]
    pub config: PathBuf,

    /// Read and render only, perform no writes
    #[clap(long, env = "POSITRONIC_DRY_RUN")]
    pub dry_run: bool,

    /// Open the pull request but leave it unmerged
    #[clap(long, env = "POSITRONIC_SKIP_MERGE")]
    pub skip_merge: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish every story shared since the last checkpoint, once
    Sync {
        #[clap(flatten)]
        options: RunOptions,
    },
    /// Synchronise periodically until interrupted
    Poll {
        #[clap(flatten)]
        options: RunOptions,

        /// Seconds between two runs
        #[clap(long, default_value_t = 7200, value_parser = clap::value_parser!(u64).range(1..))]
        frequency_secs: u64,
    },
    /// Publish one curated link
    Post {
        #[clap(flatten)]
        options: RunOptions,

        #[clap(long)]
        title: String,

        #[clap(long)]
        url: String,

        #[clap(long, default_value = "")]
        comment: String,
    },
}

/// Loads the config file and applies the command-line overrides.
fn prepare(options: &RunOptions) -> Result<(CliConfig, PublishConfig)> {
    let config = load_config(&options.config)?;
    let mut publish = config.publish_config();
    publish.dry_run |= options.dry_run;
    publish.skip_merge |= options.skip_merge;
    publish.trace_loaded();
    Ok((config, publish))
}

/// Each remote gets its own pacing.
struct Limiters {
    github: Arc<RateLimiter>,
    newsblur: Arc<RateLimiter>,
}

impl Limiters {
    fn new(config: &CliConfig) -> Self {
        Self {
            github: Arc::new(RateLimiter::new(config.api_interval())),
            newsblur: Arc::new(RateLimiter::new(config.api_interval())),
        }
    }
}

fn github_client(
    config: &CliConfig,
    token: &str,
    limiter: Arc<RateLimiter>,
) -> Result<GithubClient> {
    GithubClient::new(&config.github_base_url, token, config.slug()?, limiter)
        .context("Failed to construct GitHub client")
}

async fn sync_once(
    config: &CliConfig,
    publish: &PublishConfig,
    credentials: &Credentials,
    limiters: &Limiters,
) -> Result<SynchroniseReport> {
    let repo = github_client(config, &credentials.github_token, limiters.github.clone())?;
    let source = NewsblurClient::login(
        &config.newsblur_base_url,
        &credentials.newsblur_username,
        &credentials.newsblur_password,
        limiters.newsblur.clone(),
    )
    .await
    .context("NewsBlur login failed")?;
    info!(user_id = source.user_id(), "Reading shared stories");

    synchronise(publish, &source, &repo)
        .await
        .context("Synchronisation failed")
}

fn print_report(command: &str, report: &SynchroniseReport) {
    let prefix = if report.dry_run { "[DRY-RUN] " } else { "" };
    if report.is_empty() {
        println!("{prefix}{command}: nothing new to publish");
        return;
    }
    println!(
        "{prefix}{command}: {} document(s), checkpoint {}",
        report.documents.len(),
        report
            .new_checkpoint
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unchanged".to_string())
    );
    for path in &report.documents {
        println!("  {path}");
    }
    if let Some(pr) = &report.pull_request {
        let status = if report.merged { "merged" } else { "open" };
        println!("  pull request #{} ({status}) {}", pr.number, pr.html_url);
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { options } => {
            let (config, publish) = prepare(&options)?;
            let credentials = Credentials::from_env()?;
            let limiters = Limiters::new(&config);
            info!(command = "sync", "Starting synchronisation");
            match sync_once(&config, &publish, &credentials, &limiters).await {
                Ok(report) => {
                    info!(command = "sync", ?report, "Synchronisation complete");
                    print_report("sync", &report);
                    Ok(())
                }
                Err(e) => {
                    error!(command = "sync", error = %format!("{e:#}"), "Synchronisation failed");
                    Err(e)
                }
            }
        }
        Commands::Poll {
            options,
            frequency_secs,
        } => {
            let (config, publish) = prepare(&options)?;
            let credentials = Credentials::from_env()?;
            poll(&config, &publish, &credentials, Duration::from_secs(frequency_secs)).await
        }
        Commands::Post {
            options,
            title,
            url,
            comment,
        } => {
            let (config, publish) = prepare(&options)?;
            let token = Credentials::github_from_env()?;
            let limiters = Limiters::new(&config);
            let repo = github_client(&config, &token, limiters.github)?;
            let post = Post {
                id: url.clone(),
                title,
                url,
                comment,
                date: Utc::now(),
            };
            info!(
                command = "post",
                title = %post.title,
                url = %post.url,
                "Publishing curated link"
            );
            let report = publish_link(&publish, &repo, &post)
                .await
                .context("Publishing curated link failed")?;
            print_report("post", &report);
            Ok(())
        }
    }
}

/// Runs [`sync_once`] on every tick until ctrl-c. The first run starts immediately.
async fn poll(
    config: &CliConfig,
    publish: &PublishConfig,
    credentials: &Credentials,
    frequency: Duration,
) -> Result<()> {
    let limiters = Limiters::new(config);
    let mut ticker = tokio::time::interval(frequency);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(command = "poll", frequency_secs = frequency.as_secs(), "Starting poller");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(command = "poll", "Received ctrl-c, stopping poller");
                return Ok(());
            }
        }

        tokio::select! {
            result = sync_once(config, publish, credentials, &limiters) => match result {
                Ok(report) => {
                    info!(command = "poll", ?report, "Synchronisation complete");
                    print_report("poll", &report);
                }
                Err(e) => {
                    error!(
                        command = "poll",
                        error = %format!("{e:#}"),
                        "Synchronisation failed, waiting for next tick"
                    );
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!(command = "poll", "Received ctrl-c, aborting in-flight synchronisation");
                return Ok(());
            }
        }
    }
}
