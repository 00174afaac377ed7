//! CLI entry point for the GitHub activity monitor.
//!
//! Parses flags, merges the optional `.ghpipe.toml`, and hands a fully
//! resolved [`ghpipe_monitor::RunConfig`] to the library's interval loop.
//! Everything that actually polls GitHub or writes to disk lives in
//! `ghpipe_monitor`/`ghpipe_github`/`ghpipe_state` — this file is just CLI
//! wiring and exit-code mapping.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use ghpipe_core::CliReporter;
use ghpipe_duration::IntervalDuration;
use ghpipe_monitor::{EnabledKinds, EventSink, RunConfig, RunOutcome};
use ghpipe_types::Reporter;

/// Polls GitHub for open issues/PRs and comments across tracked
/// repositories, diffing against locally persisted watermarks and
/// publishing categorized events to a durable stream.
#[derive(Parser, Debug)]
#[command(name = "ghpipe-monitor", version)]
struct Cli {
    /// Root of the per-item directory tree.
    base_path: PathBuf,

    /// Comma-separated repositories to track (owner/name). Defaults to
    /// every `<owner>/<name>` directory already present under base-path.
    #[arg(long)]
    repositories: Option<String>,

    /// NATS server URL.
    #[arg(long)]
    nats_server: Option<String>,

    /// Compute and log events without publishing or writing any state.
    #[arg(long)]
    dry_run: bool,

    /// Only consider items updated at or after this ISO-8601 timestamp
    /// during discovery.
    #[arg(long)]
    updated_since: Option<String>,

    /// Explicit config file path, overriding the default `.ghpipe.toml`
    /// lookup in the current directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// How often to run a cycle (e.g. `5m`, `1h30m`). Omit for one-shot.
    #[arg(long)]
    interval: Option<IntervalDuration>,

    #[arg(long = "monitor-issues", action = clap::ArgAction::SetTrue)]
    monitor_issues: bool,
    #[arg(long = "no-monitor-issues", action = clap::ArgAction::SetTrue, conflicts_with = "monitor_issues")]
    no_monitor_issues: bool,

    #[arg(long = "monitor-prs", action = clap::ArgAction::SetTrue)]
    monitor_prs: bool,
    #[arg(long = "no-monitor-prs", action = clap::ArgAction::SetTrue, conflicts_with = "monitor_prs")]
    no_monitor_prs: bool,

    #[arg(long = "monitor-issue-comments", action = clap::ArgAction::SetTrue)]
    monitor_issue_comments: bool,
    #[arg(
        long = "no-monitor-issue-comments",
        action = clap::ArgAction::SetTrue,
        conflicts_with = "monitor_issue_comments"
    )]
    no_monitor_issue_comments: bool,

    #[arg(long = "monitor-pr-comments", action = clap::ArgAction::SetTrue)]
    monitor_pr_comments: bool,
    #[arg(
        long = "no-monitor-pr-comments",
        action = clap::ArgAction::SetTrue,
        conflicts_with = "monitor_pr_comments"
    )]
    no_monitor_pr_comments: bool,

    #[arg(long = "active-only", action = clap::ArgAction::SetTrue)]
    active_only: bool,
    #[arg(long = "no-active-only", action = clap::ArgAction::SetTrue, conflicts_with = "active_only")]
    no_active_only: bool,
}

const DEFAULT_NATS_SERVER: &str = "nats://localhost:4222";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match build_run_config(&cli, &mut reporter) {
        Ok((run_config, nats_server)) => {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    reporter.error(&format!("failed to start async runtime: {e:#}"));
                    return ExitCode::from(1);
                }
            };
            runtime.block_on(run(run_config, nats_server, &mut reporter))
        }
        Err(e) => {
            reporter.error(&format!("configuration error: {e:#}"));
            ExitCode::from(1)
        }
    }
}

fn build_run_config(cli: &Cli, reporter: &mut dyn Reporter) -> Result<(RunConfig, String)> {
    let config_dir = std::env::current_dir().context("failed to determine current directory")?;
    let file_config = match &cli.config {
        Some(path) => ghpipe_config::load_config_from_file(path)?,
        None => ghpipe_config::load_config(&config_dir)?,
    };

    let nats_server = ghpipe_config::resolve(
        cli.nats_server.clone(),
        file_config.nats_server.clone(),
        DEFAULT_NATS_SERVER.to_string(),
    );

    let repositories = cli
        .repositories
        .clone()
        .or(file_config.repositories.clone())
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty());

    let updated_since = cli
        .updated_since
        .as_deref()
        .map(parse_updated_since)
        .transpose()?;

    let enabled = EnabledKinds {
        issues: ghpipe_monitor::resolve_toggle(cli.monitor_issues, cli.no_monitor_issues, true),
        prs: ghpipe_monitor::resolve_toggle(cli.monitor_prs, cli.no_monitor_prs, true),
        issue_comments: ghpipe_monitor::resolve_toggle(
            cli.monitor_issue_comments,
            cli.no_monitor_issue_comments,
            true,
        ),
        pr_comments: ghpipe_monitor::resolve_toggle(cli.monitor_pr_comments, cli.no_monitor_pr_comments, true),
    };
    let active_only = ghpipe_monitor::resolve_toggle(cli.active_only, cli.no_active_only, false);

    if cli.dry_run {
        reporter.info("dry-run: no events will be published and no state will be written");
    }

    Ok((
        RunConfig {
            base_path: cli.base_path.clone(),
            dry_run: cli.dry_run,
            updated_since,
            enabled,
            active_only,
            repositories,
            interval: cli.interval.map(IntervalDuration::as_duration),
        },
        nats_server,
    ))
}

fn parse_updated_since(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("--updated-since value {raw:?} is not a valid ISO-8601 timestamp"))
}

async fn run(cfg: RunConfig, nats_server: String, reporter: &mut dyn Reporter) -> ExitCode {
    let sink = if cfg.dry_run {
        EventSink::DryRun
    } else {
        match ghpipe_stream::EventPublisher::connect(&nats_server).await {
            Ok(publisher) => EventSink::Live(publisher),
            Err(e) => {
                reporter.error(&format!("failed to connect to NATS at {nats_server}: {e:#}"));
                return ExitCode::from(1);
            }
        }
    };

    match ghpipe_monitor::run(cfg, sink, reporter).await {
        Ok(RunOutcome::Completed) => ExitCode::from(0),
        Ok(RunOutcome::Interrupted) => ExitCode::from(130),
        Err(e) => {
            reporter.error(&format!("{e:#}"));
            ExitCode::from(1)
        }
    }
}
