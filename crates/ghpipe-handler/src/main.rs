//! CLI entry point for the GitHub event handler.
//!
//! Parses flags, merges the optional `.ghpipe.toml`, and hands a fully
//! resolved [`ghpipe_handler::HandlerConfig`] to the library's fetch
//! loop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ghpipe_core::CliReporter;
use ghpipe_types::Reporter;
use regex::Regex;

/// Consumes GitHub activity events from the durable stream, maintains the
/// per-item directory tree, resolves a prompt template per event, and
/// invokes the LLM CLI with it.
#[derive(Parser, Debug)]
#[command(name = "ghpipe-handler", version)]
struct Cli {
    /// Root of the per-item directory tree.
    base_path: PathBuf,

    /// Root of the hierarchical template tree.
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// NATS server URL.
    #[arg(long)]
    nats_server: Option<String>,

    /// JetStream stream name.
    #[arg(long)]
    stream: Option<String>,

    /// Durable consumer name.
    #[arg(long)]
    consumer: Option<String>,

    /// Max messages fetched per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds to wait for the first message of a batch.
    #[arg(long)]
    fetch_timeout: Option<u64>,

    /// Regex; authors matching it are skipped (acked, untouched).
    #[arg(long)]
    skip_users: Option<String>,

    /// Regex; repositories not matching it are skipped (acked, untouched).
    #[arg(long)]
    repositories: Option<String>,

    /// Delete and recreate the durable consumer at start-up.
    #[arg(long)]
    recreate_consumer: bool,

    /// Bypass transcript parsing and inherit the LLM CLI's stdio directly.
    #[arg(long)]
    claude_verbose: bool,

    /// Skip the interactive per-event confirmation prompt.
    #[arg(long)]
    auto_confirm: bool,

    /// Explicit config file path, overriding the default `.ghpipe.toml`
    /// lookup in the current directory.
    #[arg(long)]
    config: Option<PathBuf>,
}

const DEFAULT_NATS_SERVER: &str = "nats://localhost:4222";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LLM_BINARY: &str = "claude";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    match build_handler_config(&cli) {
        Ok(cfg) => {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    reporter.error(&format!("failed to start async runtime: {e:#}"));
                    return ExitCode::from(1);
                }
            };
            match runtime.block_on(ghpipe_handler::run(cfg, &mut reporter)) {
                Ok(()) => ExitCode::from(0),
                Err(e) => {
                    reporter.error(&format!("{e:#}"));
                    ExitCode::from(1)
                }
            }
        }
        Err(e) => {
            reporter.error(&format!("configuration error: {e:#}"));
            ExitCode::from(1)
        }
    }
}

fn build_handler_config(cli: &Cli) -> Result<ghpipe_handler::HandlerConfig> {
    let config_dir = std::env::current_dir().context("failed to determine current directory")?;
    let file_config = match &cli.config {
        Some(path) => ghpipe_config::load_config_from_file(path)?,
        None => ghpipe_config::load_config(&config_dir)?,
    };

    let templates_dir = cli
        .templates_dir
        .clone()
        .or(file_config.templates_dir.clone().map(PathBuf::from))
        .context("--templates-dir is required (or set templates_dir in .ghpipe.toml)")?;

    let skip_users = cli
        .skip_users
        .clone()
        .or(file_config.skip_users.clone())
        .map(|pattern| Regex::new(&pattern).with_context(|| format!("invalid --skip-users regex {pattern:?}")))
        .transpose()?;

    let repositories = cli
        .repositories
        .clone()
        .or(file_config.repositories.clone())
        .map(|pattern| Regex::new(&pattern).with_context(|| format!("invalid --repositories regex {pattern:?}")))
        .transpose()?;

    Ok(ghpipe_handler::HandlerConfig {
        base_path: cli.base_path.clone(),
        templates_dir,
        nats_server: ghpipe_config::resolve(
            cli.nats_server.clone(),
            file_config.nats_server.clone(),
            DEFAULT_NATS_SERVER.to_string(),
        ),
        stream: ghpipe_config::resolve(
            cli.stream.clone(),
            file_config.stream.clone(),
            ghpipe_stream::STREAM_NAME.to_string(),
        ),
        consumer: ghpipe_config::resolve(
            cli.consumer.clone(),
            file_config.consumer.clone(),
            ghpipe_stream::DEFAULT_CONSUMER_NAME.to_string(),
        ),
        batch_size: cli.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        fetch_timeout: Duration::from_secs(cli.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS)),
        skip_users,
        repositories,
        recreate_consumer: cli.recreate_consumer,
        claude_verbose: cli.claude_verbose,
        auto_confirm: cli.auto_confirm,
        llm_binary: DEFAULT_LLM_BINARY.to_string(),
    })
}
