//! Monitor orchestrator: the cycle logic driven by the `ghpipe-monitor` binary.
//!
//! A cycle is discovery, then an active scan, then update/closed detection,
//! then comment detection, each per enabled kind per tracked repository, in
//! that order (see module docs on [`run_cycle`] for why the order matters).
//! The binary itself only parses CLI flags, merges the optional config
//! file, and drives the interval loop in [`run`]; everything that actually
//! talks to GitHub, the stream, and the filesystem lives here so it can be
//! exercised without a terminal attached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ghpipe_types::{
    CommentEventEnvelope, EventAction, EventSubject, ItemEventEnvelope, Kind, Reporter, TrackedItem,
};

/// Which of the four pollable facets are enabled for this run.
#[derive(Debug, Clone, Copy)]
pub struct EnabledKinds {
    pub issues: bool,
    pub prs: bool,
    pub issue_comments: bool,
    pub pr_comments: bool,
}

/// Fully resolved configuration for one run, after CLI/config-file/default
/// precedence has already been applied by the binary.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_path: PathBuf,
    pub dry_run: bool,
    pub updated_since: Option<DateTime<Utc>>,
    pub enabled: EnabledKinds,
    pub active_only: bool,
    pub repositories: Option<Vec<String>>,
    pub interval: Option<Duration>,
}

/// Resolve a `--foo`/`--no-foo` flag pair against a built-in default.
/// `negative` wins if both are somehow set (clap's `conflicts_with`
/// normally prevents that), otherwise `positive` wins, otherwise `default`.
pub fn resolve_toggle(positive: bool, negative: bool, default: bool) -> bool {
    if negative {
        false
    } else if positive {
        true
    } else {
        default
    }
}

/// `true` if an `updated` event should fire for an item whose GitHub
/// `updated_at` is `updated_at` against a stored `.last_checked` of
/// `last_checked`. Matches §8 Testable Property 4: gated on strict
/// inequality, and an absent watermark always gates true.
pub fn should_emit_updated(updated_at: DateTime<Utc>, last_checked: Option<DateTime<Utc>>) -> bool {
    last_checked.is_none_or(|lc| updated_at > lc)
}

/// `true` if a comment should be emitted given the item's individual
/// comment watermark. Same strict-inequality rule as [`should_emit_updated`].
pub fn should_emit_comment(comment_updated_at: DateTime<Utc>, item_watermark: Option<DateTime<Utc>>) -> bool {
    item_watermark.is_none_or(|wm| comment_updated_at > wm)
}

/// Destination for outbound events: a live stream connection, or a
/// dry-run stand-in that only logs what would have been published and
/// performs no filesystem writes either (per §8 Testable Property 3's
/// "unless --dry-run" carve-out).
pub enum EventSink {
    Live(ghpipe_stream::EventPublisher),
    DryRun,
}

impl EventSink {
    async fn emit(&self, subject: &str, payload: &[u8], reporter: &mut dyn Reporter) -> Result<()> {
        match self {
            EventSink::Live(publisher) => publisher.publish(subject, payload.to_vec()).await,
            EventSink::DryRun => {
                reporter.info(&format!("[dry-run] would publish on {subject}"));
                Ok(())
            }
        }
    }

    fn is_dry_run(&self) -> bool {
        matches!(self, EventSink::DryRun)
    }
}

/// Summary of one completed cycle, used for the interval loop's Ctrl-C
/// exit message.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub events_emitted: usize,
}

fn repositories_for(cfg: &RunConfig) -> Result<Vec<String>> {
    match &cfg.repositories {
        Some(list) => Ok(list.clone()),
        None => ghpipe_state::discover_repositories(&cfg.base_path)
            .context("failed to discover tracked repositories from base directory"),
    }
}

async fn emit_item_event(
    sink: &EventSink,
    reporter: &mut dyn Reporter,
    kind: Kind,
    action: EventAction,
    repository: &str,
    number: &str,
    item: Option<&TrackedItem>,
) -> Result<()> {
    let subject = EventSubject::new(kind, action).as_subject();
    let envelope = ItemEventEnvelope {
        repository: repository.to_string(),
        number: number.to_string(),
        item: item.cloned(),
    };
    let payload =
        serde_json::to_vec(&envelope).with_context(|| format!("failed to serialize {subject} envelope"))?;
    sink.emit(&subject, &payload, reporter).await
}

async fn emit_comment_event(
    sink: &EventSink,
    reporter: &mut dyn Reporter,
    kind: Kind,
    repository: &str,
    number: &str,
    comment: ghpipe_types::Comment,
) -> Result<()> {
    let subject = EventSubject::new(kind, EventAction::CommentNew).as_subject();
    let envelope = CommentEventEnvelope::new(kind, repository.to_string(), number.to_string(), comment);
    let payload =
        serde_json::to_vec(&envelope).with_context(|| format!("failed to serialize {subject} envelope"))?;
    sink.emit(&subject, &payload, reporter).await
}

/// Classify an item that has no cached `.type`, probing GitHub and
/// caching the result. Skipped entirely in dry-run mode, where nothing is
/// written and the probe's answer is used for this cycle only.
async fn classify_cached(base: &PathBuf, repository: &str, number: &str, dry_run: bool) -> Result<Kind> {
    if let Some(kind) = ghpipe_state::read_kind(base, repository, number)? {
        return Ok(kind);
    }
    let kind = ghpipe_github::classify_via_pr_view(repository, number).await;
    if !dry_run {
        ghpipe_state::write_kind(base, repository, number, kind)?;
    }
    Ok(kind)
}

/// Run one full cycle: discovery, active scan, update/closed, comments,
/// across every tracked repository. All timestamps written during the
/// cycle use `cycle_start`, captured once by the caller.
pub async fn run_cycle(
    cfg: &RunConfig,
    sink: &EventSink,
    cycle_start: DateTime<Utc>,
    reporter: &mut dyn Reporter,
) -> Result<CycleStats> {
    let mut stats = CycleStats::default();
    let repositories = repositories_for(cfg)?;

    for repository in &repositories {
        // --- 1. Discovery ---
        let discovery_kind = match (cfg.enabled.issues, cfg.enabled.prs) {
            (true, true) => None,
            (true, false) => Some(Kind::Issue),
            (false, true) => Some(Kind::Pr),
            (false, false) => None,
        };
        if cfg.enabled.issues || cfg.enabled.prs {
            let open = ghpipe_github::fetch_open_items(repository, cfg.updated_since, discovery_kind, reporter)
                .await
                .with_context(|| format!("discovery scan failed for {repository}"))?;
            for (number, (kind, item)) in &open {
                if ghpipe_state::item_dir_exists(&cfg.base_path, repository, number) {
                    continue;
                }
                let action = EventAction::New;
                emit_item_event(sink, reporter, *kind, action, repository, number, Some(item)).await?;
                stats.events_emitted += 1;
                if !cfg.dry_run {
                    ghpipe_state::create_item_dir(&cfg.base_path, repository, number)?;
                    ghpipe_state::write_kind(&cfg.base_path, repository, number, *kind)?;
                    ghpipe_state::write_watermark(
                        &cfg.base_path,
                        repository,
                        number,
                        ghpipe_state::WatermarkKind::Item,
                        cycle_start,
                    )?;
                }
            }
        }

        // --- 2. Active scan ---
        let items = ghpipe_state::list_items(&cfg.base_path, cfg.active_only, Some(std::slice::from_ref(repository)))
            .with_context(|| format!("failed to list items for {repository}"))?;
        let mut active_issues = Vec::new();
        let mut active_prs = Vec::new();
        for (repo, number) in items {
            let kind = classify_cached(&cfg.base_path, &repo, &number, cfg.dry_run).await?;
            match kind {
                Kind::Issue => active_issues.push(number),
                Kind::Pr => active_prs.push(number),
            }
        }

        // --- 3. Update/closed ---
        if cfg.enabled.issues {
            update_or_close(
                cfg,
                sink,
                reporter,
                repository,
                Kind::Issue,
                &active_issues,
                cycle_start,
                &mut stats,
            )
            .await?;
        }
        if cfg.enabled.prs {
            update_or_close(
                cfg,
                sink,
                reporter,
                repository,
                Kind::Pr,
                &active_prs,
                cycle_start,
                &mut stats,
            )
            .await?;
        }

        // --- 4. Comments ---
        if cfg.enabled.issue_comments {
            poll_comments(cfg, sink, reporter, repository, Kind::Issue, &active_issues, cycle_start, &mut stats)
                .await?;
        }
        if cfg.enabled.pr_comments {
            poll_comments(cfg, sink, reporter, repository, Kind::Pr, &active_prs, cycle_start, &mut stats).await?;
        }
    }

    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
async fn update_or_close(
    cfg: &RunConfig,
    sink: &EventSink,
    reporter: &mut dyn Reporter,
    repository: &str,
    kind: Kind,
    active_numbers: &[String],
    cycle_start: DateTime<Utc>,
    stats: &mut CycleStats,
) -> Result<()> {
    let open: HashMap<String, (Kind, TrackedItem)> =
        ghpipe_github::fetch_open_items(repository, None, Some(kind), reporter)
            .await
            .with_context(|| format!("update/closed scan failed for {repository}"))?;

    for number in active_numbers {
        match open.get(number) {
            Some((_, item)) => {
                let last_checked = ghpipe_state::read_watermark(
                    &cfg.base_path,
                    repository,
                    number,
                    ghpipe_state::WatermarkKind::Item,
                )?;
                if should_emit_updated(item.updated_at, last_checked) {
                    emit_item_event(sink, reporter, kind, EventAction::Updated, repository, number, Some(item))
                        .await?;
                    stats.events_emitted += 1;
                }
                if !cfg.dry_run {
                    ghpipe_state::write_watermark(
                        &cfg.base_path,
                        repository,
                        number,
                        ghpipe_state::WatermarkKind::Item,
                        cycle_start,
                    )?;
                }
            }
            None => {
                emit_item_event(sink, reporter, kind, EventAction::Closed, repository, number, None).await?;
                stats.events_emitted += 1;
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn poll_comments(
    cfg: &RunConfig,
    sink: &EventSink,
    reporter: &mut dyn Reporter,
    repository: &str,
    kind: Kind,
    active_numbers: &[String],
    cycle_start: DateTime<Utc>,
    stats: &mut CycleStats,
) -> Result<()> {
    let since = ghpipe_state::repo_earliest_comment_watermark(&cfg.base_path, repository, kind)?;
    let by_number = ghpipe_github::fetch_repo_comments(repository, kind, since, reporter)
        .await
        .with_context(|| format!("comment scan failed for {repository}"))?;
    let watermark_kind = ghpipe_state::WatermarkKind::for_comment_kind(kind);

    for number in active_numbers {
        let item_watermark = ghpipe_state::read_watermark(&cfg.base_path, repository, number, watermark_kind)?;
        if let Some(comments) = by_number.get(number) {
            for comment in comments {
                if should_emit_comment(comment.updated_at, item_watermark) {
                    emit_comment_event(sink, reporter, kind, repository, number, comment.clone()).await?;
                    stats.events_emitted += 1;
                }
            }
        }
        if !cfg.dry_run {
            ghpipe_state::write_watermark(&cfg.base_path, repository, number, watermark_kind, cycle_start)?;
        }
    }

    Ok(())
}

/// How the run loop ended, mapped to the binary's process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Drive the interval loop: one cycle if `cfg.interval` is `None`,
/// otherwise cycles back-to-back with a sleep for whatever's left of the
/// interval, forever, until Ctrl-C. A cycle that overruns its interval
/// logs a warning and starts the next cycle immediately rather than
/// sleeping a negative duration.
pub async fn run(cfg: RunConfig, sink: EventSink, reporter: &mut dyn Reporter) -> Result<RunOutcome> {
    if !sink.is_dry_run() {
        if let EventSink::Live(publisher) = &sink {
            publisher.ensure_stream().await.context("failed to ensure GITHUB_EVENTS stream")?;
        }
    }

    let start = Instant::now();
    let mut cycles_completed = 0usize;

    loop {
        let cycle_started_at = Instant::now();
        let cycle_start_ts = Utc::now();

        let cycle = run_cycle(&cfg, &sink, cycle_start_ts, reporter);
        tokio::select! {
            result = cycle => {
                result?;
                cycles_completed += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                reporter.info(&format!(
                    "interrupted after {cycles_completed} cycle(s), {:.1}s elapsed",
                    start.elapsed().as_secs_f64()
                ));
                return Ok(RunOutcome::Interrupted);
            }
        }

        let Some(interval) = cfg.interval else {
            return Ok(RunOutcome::Completed);
        };

        let elapsed = cycle_started_at.elapsed();
        let remaining = interval.checked_sub(elapsed);
        match remaining {
            Some(remaining) if !remaining.is_zero() => {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = tokio::signal::ctrl_c() => {
                        reporter.info(&format!(
                            "interrupted after {cycles_completed} cycle(s), {:.1}s elapsed",
                            start.elapsed().as_secs_f64()
                        ));
                        return Ok(RunOutcome::Interrupted);
                    }
                }
            }
            _ => {
                reporter.warn("cycle overran the configured interval; starting next cycle immediately");
            }
        }
    }
}
