//! Handler event dispatch: decode, filter, confirm, act, invoke.
//!
//! Mirrors the shape of `ghpipe_monitor`'s split between a thin CLI
//! binary and a library the binary drives: everything that actually
//! decodes envelopes, touches the item tree, or spawns the LLM lives
//! here, independent of the terminal and the live stream connection, so
//! [`dispatch`] can be exercised directly in tests.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use console::Term;
use ghpipe_types::{EventSubject, Reporter};
use regex::Regex;
use serde_json::Value;

/// Resolved handler configuration, after CLI/config-file/default
/// precedence has been applied by the binary.
#[derive(Clone)]
pub struct HandlerConfig {
    pub base_path: PathBuf,
    pub templates_dir: PathBuf,
    pub nats_server: String,
    pub stream: String,
    pub consumer: String,
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    pub skip_users: Option<Regex>,
    pub repositories: Option<Regex>,
    pub recreate_consumer: bool,
    pub claude_verbose: bool,
    pub auto_confirm: bool,
    pub llm_binary: String,
}

/// What the dispatcher decided should happen to the in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handled successfully (including filtered-out, skip-sentinel, and
    /// operator-skip cases) — acknowledge, no redelivery.
    Ack,
    /// A transient failure occurred — negatively acknowledge so the
    /// broker redelivers.
    Nak,
    /// A non-recoverable parse/schema failure — terminate, no redelivery.
    Term,
    /// The operator hit Ctrl-C at the confirmation prompt — stop the
    /// handler process entirely after acking nothing further.
    Abort,
}

#[derive(Debug, Clone, Default)]
struct ParsedEnvelope {
    repository: String,
    number: String,
    author: Option<String>,
}

/// Decode the required `repository`/`number` fields (and the optional
/// `author`) out of a raw event payload. A JSON parse failure is
/// reported as [`MessageOutcome::Nak`]; valid JSON missing a required
/// field is [`MessageOutcome::Term`].
fn decode_envelope(payload: &[u8]) -> std::result::Result<ParsedEnvelope, MessageOutcome> {
    let value: Value = serde_json::from_slice(payload).map_err(|_| MessageOutcome::Nak)?;
    let repository = value
        .get("repository")
        .and_then(Value::as_str)
        .ok_or(MessageOutcome::Term)?
        .to_string();
    let number = value
        .get("number")
        .and_then(Value::as_str)
        .ok_or(MessageOutcome::Term)?
        .to_string();
    let author = value.get("author").and_then(Value::as_str).map(str::to_string);
    Ok(ParsedEnvelope { repository, number, author })
}

/// Dispatch one message end to end: decode, filter, confirm, act on the
/// filesystem, resolve a template, and invoke the LLM if one is found.
pub async fn dispatch(cfg: &HandlerConfig, subject: &str, payload: &[u8], reporter: &mut dyn Reporter) -> MessageOutcome {
    let Some(event) = EventSubject::parse(subject) else {
        reporter.error(&format!("unrecognized subject {subject:?}; acking to drain"));
        return MessageOutcome::Ack;
    };

    let envelope = match decode_envelope(payload) {
        Ok(e) => e,
        Err(outcome) => {
            match outcome {
                MessageOutcome::Nak => reporter.error(&format!("malformed JSON payload on {subject}")),
                MessageOutcome::Term => reporter.error(&format!("missing required field in payload on {subject}")),
                _ => {}
            }
            return outcome;
        }
    };

    if let Some(repo_filter) = &cfg.repositories {
        if !repo_filter.is_match(&envelope.repository) {
            reporter.info(&format!("{} does not match --repositories filter, acking", envelope.repository));
            return MessageOutcome::Ack;
        }
    }

    if let (Some(skip_users), Some(author)) = (&cfg.skip_users, &envelope.author) {
        if skip_users.is_match(author) {
            reporter.info(&format!("author {author:?} matches --skip-users filter, acking"));
            return MessageOutcome::Ack;
        }
    }

    if !cfg.auto_confirm {
        let term = Term::stdout();
        let prompt = format!(
            "{subject} for {}#{} — Enter to process, 's' to skip: ",
            envelope.repository, envelope.number
        );
        match ghpipe_core::confirm_single_keystroke(&term, &prompt) {
            Ok(ghpipe_core::Confirmation::Proceed) => {}
            Ok(ghpipe_core::Confirmation::Skip) => {
                reporter.info("operator skipped, acking");
                return MessageOutcome::Ack;
            }
            Ok(ghpipe_core::Confirmation::Abort) => {
                reporter.info("operator aborted");
                return MessageOutcome::Abort;
            }
            Err(e) => {
                reporter.error(&format!("failed to read confirmation keystroke: {e:#}"));
                return MessageOutcome::Nak;
            }
        }
    }

    use ghpipe_types::EventAction;
    match event.action {
        EventAction::New => {
            if let Err(e) = ghpipe_state::create_item_dir(&cfg.base_path, &envelope.repository, &envelope.number) {
                reporter.error(&format!("failed to create item directory: {e:#}"));
                return MessageOutcome::Nak;
            }
        }
        EventAction::Closed => match ghpipe_state::remove_active_file(&cfg.base_path, &envelope.repository, &envelope.number) {
            Ok(true) => {}
            Ok(false) => reporter.warn(&format!(
                "{}#{} had no .active marker to remove",
                envelope.repository, envelope.number
            )),
            Err(e) => {
                reporter.error(&format!("failed to remove .active marker: {e:#}"));
                return MessageOutcome::Nak;
            }
        },
        EventAction::Updated | EventAction::CommentNew => {}
    }

    let resolution = match ghpipe_templates::resolve_template(&cfg.templates_dir, &envelope.repository, &event.as_subject()) {
        Ok(r) => r,
        Err(e) => {
            reporter.error(&format!("template resolution failed: {e:#}"));
            return MessageOutcome::Nak;
        }
    };

    let template_path = match resolution {
        ghpipe_templates::TemplateResolution::Found(path) => path,
        ghpipe_templates::TemplateResolution::Skipped => {
            reporter.info(&format!("template for {subject} is a skip sentinel, acking"));
            return MessageOutcome::Ack;
        }
        ghpipe_templates::TemplateResolution::Miss => {
            reporter.info(&format!("no template found for {subject}/{}, acking", envelope.repository));
            return MessageOutcome::Ack;
        }
    };

    let template_body = match std::fs::read_to_string(&template_path) {
        Ok(body) => body,
        Err(e) => {
            reporter.error(&format!("failed to read template {}: {e:#}", template_path.display()));
            return MessageOutcome::Nak;
        }
    };

    let number: u64 = envelope.number.parse().unwrap_or(0);
    let base_path_str = cfg.base_path.join(&envelope.repository).join(&envelope.number);
    let prompt = ghpipe_process::build_prompt(&envelope.repository, number, &base_path_str.display().to_string(), &template_body);

    let mut sink = ghpipe_process::StdoutTranscriptSink;
    match ghpipe_process::invoke(&cfg.llm_binary, &prompt, cfg.claude_verbose, &mut sink).await {
        Ok(outcome) if outcome.success => MessageOutcome::Ack,
        Ok(outcome) => {
            let tail: String = outcome.stderr.lines().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
            reporter.error(&format!(
                "LLM invocation for {subject} exited {:?}: {tail}",
                outcome.exit_code
            ));
            MessageOutcome::Nak
        }
        Err(e) => {
            reporter.error(&format!("failed to invoke LLM CLI: {e:#}"));
            MessageOutcome::Nak
        }
    }
}

/// Drive the durable-consumer fetch loop: connect, then repeatedly fetch a
/// batch and dispatch each message strictly in arrival order, acking/
/// naking/terming as [`dispatch`] decides. Returns when the operator hits
/// Ctrl-C, either at the top of the loop or via an `Abort` from the
/// confirmation gate.
pub async fn run(cfg: HandlerConfig, reporter: &mut dyn Reporter) -> Result<()> {
    let consumer = ghpipe_stream::StreamConsumer::connect(
        &cfg.nats_server,
        &cfg.stream,
        &cfg.consumer,
        cfg.recreate_consumer,
    )
    .await
    .context("failed to connect durable consumer")?;

    loop {
        let fetch = consumer.fetch_batch(cfg.batch_size, cfg.fetch_timeout);
        let messages = tokio::select! {
            result = fetch => result,
            _ = tokio::signal::ctrl_c() => {
                reporter.info("interrupted");
                return Ok(());
            }
        };

        let messages = match messages {
            Ok(messages) => messages,
            Err(e) => {
                reporter.error(&format!("fetch failed: {e:#}"));
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for message in messages {
            let subject = message.subject.to_string();
            let outcome = dispatch(&cfg, &subject, &message.payload, reporter).await;
            match outcome {
                MessageOutcome::Ack => {
                    if let Err(e) = message.ack().await {
                        reporter.error(&format!("failed to ack message on {subject}: {e:#}"));
                    }
                }
                MessageOutcome::Nak => {
                    if let Err(e) = message
                        .ack_with(async_nats::jetstream::AckKind::Nak(None))
                        .await
                    {
                        reporter.error(&format!("failed to nak message on {subject}: {e:#}"));
                    }
                }
                MessageOutcome::Term => {
                    if let Err(e) = message.ack_with(async_nats::jetstream::AckKind::Term).await {
                        reporter.error(&format!("failed to term message on {subject}: {e:#}"));
                    }
                }
                MessageOutcome::Abort => {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghpipe_types::{Kind, Reporter};
    use serde_json::json;
    use tempfile::tempdir;

    struct NullReporter;
    impl Reporter for NullReporter {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, _msg: &str) {}
        fn error(&mut self, _msg: &str) {}
    }

    fn base_config(base_path: PathBuf, templates_dir: PathBuf) -> HandlerConfig {
        HandlerConfig {
            base_path,
            templates_dir,
            nats_server: "nats://localhost:4222".into(),
            stream: ghpipe_stream::STREAM_NAME.into(),
            consumer: ghpipe_stream::DEFAULT_CONSUMER_NAME.into(),
            batch_size: 10,
            fetch_timeout: Duration::from_secs(5),
            skip_users: None,
            repositories: None,
            recreate_consumer: false,
            claude_verbose: false,
            auto_confirm: true,
            llm_binary: "definitely-not-a-real-binary-xyz".into(),
        }
    }

    #[test]
    fn decode_envelope_rejects_invalid_json() {
        let outcome = decode_envelope(b"not json");
        assert_eq!(outcome.unwrap_err(), MessageOutcome::Nak);
    }

    #[test]
    fn decode_envelope_requires_repository_and_number() {
        let outcome = decode_envelope(br#"{"repository": "acme/widget"}"#);
        assert_eq!(outcome.unwrap_err(), MessageOutcome::Term);
    }

    #[test]
    fn decode_envelope_author_is_optional() {
        let parsed = decode_envelope(br#"{"repository": "acme/widget", "number": "7"}"#).unwrap();
        assert_eq!(parsed.repository, "acme/widget");
        assert_eq!(parsed.number, "7");
        assert_eq!(parsed.author, None);
    }

    #[tokio::test]
    async fn unrecognized_subject_is_acked() {
        let td = tempdir().unwrap();
        let cfg = base_config(td.path().join("base"), td.path().join("templates"));
        let mut reporter = NullReporter;
        let outcome = dispatch(&cfg, "github.issue.renamed", b"{}", &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
    }

    #[tokio::test]
    async fn repository_filter_miss_acks_without_side_effects() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        let mut cfg = base_config(base_path.clone(), td.path().join("templates"));
        cfg.repositories = Some(Regex::new("^other/repo$").unwrap());
        let payload = json!({"repository": "acme/widget", "number": "7"}).to_string();
        let mut reporter = NullReporter;
        let outcome = dispatch(&cfg, "github.issue.new", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
        assert!(!ghpipe_state::item_dir_exists(&base_path, "acme/widget", "7"));
    }

    #[tokio::test]
    async fn skip_user_filter_acks_without_side_effects() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        let mut cfg = base_config(base_path.clone(), td.path().join("templates"));
        cfg.skip_users = Some(Regex::new("^dependabot$").unwrap());
        let payload = json!({"repository": "acme/widget", "number": "7", "author": "dependabot"}).to_string();
        let mut reporter = NullReporter;
        let outcome = dispatch(&cfg, "github.issue.new", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
        assert!(!ghpipe_state::item_dir_exists(&base_path, "acme/widget", "7"));
    }

    #[tokio::test]
    async fn new_event_creates_item_directory() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        let cfg = base_config(base_path.clone(), td.path().join("templates"));
        let payload = json!({"repository": "acme/widget", "number": "7"}).to_string();
        let mut reporter = NullReporter;
        // No template exists, so this acks as a no-op after creating the directory.
        let outcome = dispatch(&cfg, "github.issue.new", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
        assert!(ghpipe_state::item_dir_exists(&base_path, "acme/widget", "7"));
    }

    #[tokio::test]
    async fn closed_event_removes_active_marker_and_warns_if_absent() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        ghpipe_state::create_item_dir(&base_path, "acme/widget", "7").unwrap();
        ghpipe_state::write_kind(&base_path, "acme/widget", "7", Kind::Issue).unwrap();
        let cfg = base_config(base_path.clone(), td.path().join("templates"));
        let payload = json!({"repository": "acme/widget", "number": "7"}).to_string();
        let mut reporter = NullReporter;
        let outcome = dispatch(&cfg, "github.issue.closed", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
        assert!(!ghpipe_state::is_active(&base_path, "acme/widget", "7"));
    }

    #[tokio::test]
    async fn skip_sentinel_template_acks_without_invoking_llm() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        let templates_dir = td.path().join("templates");
        std::fs::create_dir_all(templates_dir.join("acme/widget")).unwrap();
        std::fs::write(templates_dir.join("acme/widget/github.pr.comment.new.md"), "   ").unwrap();
        let cfg = base_config(base_path, templates_dir);
        let payload = json!({"repository": "acme/widget", "number": "3", "id": "c1"}).to_string();
        let mut reporter = NullReporter;
        let outcome = dispatch(&cfg, "github.pr.comment.new", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
    }

    #[tokio::test]
    async fn legacy_process_subject_is_routed_like_issue_updated() {
        let td = tempdir().unwrap();
        let base_path = td.path().join("base");
        let cfg = base_config(base_path, td.path().join("templates"));
        let payload = json!({"repository": "acme/widget", "number": "7"}).to_string();
        let mut reporter = NullReporter;
        // No template present: acks as a no-op, same as github.issue.updated would.
        let outcome = dispatch(&cfg, "github.issue.process", payload.as_bytes(), &mut reporter).await;
        assert_eq!(outcome, MessageOutcome::Ack);
    }
}
