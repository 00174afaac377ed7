//! Invocation of the external LLM CLI and streaming of its NDJSON transcript.
//!
//! The handler never talks to an LLM provider directly — it shells out to a
//! CLI (by default `claude`) the same way the monitor shells out to `gh`.
//! [`invoke`] builds the prompt, spawns the child with flags asking for a
//! streamed JSON-lines transcript, and renders that transcript through a
//! [`TranscriptSink`] as it arrives. A `claude_verbose` escape hatch skips
//! all of that and just inherits the child's stdio, for when the structured
//! rendering gets in the way of debugging the CLI itself.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Tools the LLM CLI is permitted to use. Fixed, not configurable per call —
/// every invocation of this pipeline grants the same surface.
pub const ALLOWED_TOOLS: &[&str] = &["Read", "Edit", "Write", "Bash", "Grep", "Glob"];

/// Build the prompt handed to the LLM CLI: a small header of positional
/// context the template can reference, followed by the template body
/// verbatim.
pub fn build_prompt(repository: &str, number: u64, base_path: &str, template_body: &str) -> String {
    format!(
        "REPOSITORY={repository} NUMBER={number} BASE_DIR={base_path}\n{template_body}",
    )
}

/// Outcome of one LLM CLI invocation.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Captured stderr, for logging when `success` is false. Empty in
    /// verbose mode, where stderr was inherited rather than captured.
    pub stderr: String,
}

/// Renders the pieces of an LLM transcript as they stream in. Implementors
/// decide where the transcript goes (stdout, a log line, a test buffer);
/// this crate only knows how to produce the pieces.
pub trait TranscriptSink {
    fn session_started(&mut self, model: &str, permission_mode: &str, tools: &[String]);
    fn text(&mut self, text: &str);
    fn tool_use(&mut self, name: &str, input: &serde_json::Value);
    /// Called when a new assistant message begins after the first one, so
    /// the sink can print a separating blank line.
    fn message_boundary(&mut self);
}

/// A [`TranscriptSink`] that writes directly to standard output, matching
/// what `--claude-verbose` would have shown had the CLI's own renderer run.
#[derive(Default)]
pub struct StdoutTranscriptSink;

impl TranscriptSink for StdoutTranscriptSink {
    fn session_started(&mut self, model: &str, permission_mode: &str, tools: &[String]) {
        println!("[session] model={model} permission-mode={permission_mode} tools={tools:?}");
    }

    fn text(&mut self, text: &str) {
        println!("{text}");
    }

    fn tool_use(&mut self, name: &str, input: &serde_json::Value) {
        println!("[Tool: {name}]");
        if let Ok(pretty) = serde_json::to_string_pretty(input) {
            for line in pretty.lines() {
                println!("  {line}");
            }
        }
    }

    fn message_boundary(&mut self) {
        println!();
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawLine {
    #[serde(rename = "system")]
    System {
        #[allow(dead_code)]
        subtype: String,
        model: Option<String>,
        #[serde(rename = "permissionMode", default)]
        permission_mode: Option<String>,
        #[serde(default)]
        tools: Vec<String>,
    },
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AssistantMessage {
    id: String,
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Parse one NDJSON transcript line and render it through `sink`, tracking
/// `last_message_id` across calls so a change in `message.id` emits a
/// boundary. Unparseable lines are silently dropped.
fn process_ndjson_line(line: &str, sink: &mut dyn TranscriptSink, last_message_id: &mut Option<String>) {
    let Ok(parsed) = serde_json::from_str::<RawLine>(line) else {
        return;
    };
    match parsed {
        RawLine::System {
            model,
            permission_mode,
            tools,
            ..
        } => {
            sink.session_started(
                model.as_deref().unwrap_or("unknown"),
                permission_mode.as_deref().unwrap_or("unknown"),
                &tools,
            );
        }
        RawLine::Assistant { message } => {
            if last_message_id.as_deref().is_some_and(|id| id != message.id) {
                sink.message_boundary();
            }
            *last_message_id = Some(message.id);
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => sink.text(&text),
                    ContentBlock::ToolUse { name, input } => sink.tool_use(&name, &input),
                    ContentBlock::Other => {}
                }
            }
        }
        RawLine::Other => {}
    }
}

/// Invoke the LLM CLI with `prompt` and stream its transcript through
/// `sink`. When `claude_verbose` is set, `sink` is never called — the
/// child's stdio is connected directly to the parent's instead.
pub async fn invoke(
    binary: &str,
    prompt: &str,
    claude_verbose: bool,
    sink: &mut dyn TranscriptSink,
) -> Result<Outcome> {
    if claude_verbose {
        return invoke_verbose(binary, prompt).await;
    }

    let mut command = Command::new(binary);
    command
        .arg("--print")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("--allowedTools")
        .arg(ALLOWED_TOOLS.join(","))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {binary}"))?;

    let mut stdin = child.stdin.take().context("child stdin was not piped")?;
    let stdin_prompt = prompt.to_string();
    let write_task = tokio::spawn(async move {
        let _ = stdin.write_all(stdin_prompt.as_bytes()).await;
        let _ = stdin.shutdown().await;
    });

    let stdout = child.stdout.take().context("child stdout was not piped")?;
    let mut lines = BufReader::new(stdout).lines();

    let mut last_message_id: Option<String> = None;
    while let Some(line) = lines.next_line().await.context("failed reading child stdout")? {
        process_ndjson_line(&line, sink, &mut last_message_id);
    }

    let _ = write_task.await;

    let stderr = match child.stderr.take() {
        Some(stderr) => {
            use tokio::io::AsyncReadExt;
            let mut buf = String::new();
            let mut stderr = stderr;
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        }
        None => String::new(),
    };

    let status = child.wait().await.context("failed waiting for child")?;
    Ok(Outcome {
        success: status.success(),
        exit_code: status.code(),
        stderr,
    })
}

async fn invoke_verbose(binary: &str, prompt: &str) -> Result<Outcome> {
    let mut command = Command::new(binary);
    command
        .arg("--print")
        .arg("--verbose")
        .arg("--allowedTools")
        .arg(ALLOWED_TOOLS.join(","))
        .arg(prompt)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = command
        .status()
        .await
        .with_context(|| format!("failed to spawn {binary}"))?;

    Ok(Outcome {
        success: status.success(),
        exit_code: status.code(),
        stderr: String::new(),
    })
}

/// Whether `binary` can be resolved on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    which::which(binary).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<String>,
    }

    impl TranscriptSink for RecordingSink {
        fn session_started(&mut self, model: &str, permission_mode: &str, tools: &[String]) {
            self.events
                .push(format!("session:{model}:{permission_mode}:{}", tools.len()));
        }
        fn text(&mut self, text: &str) {
            self.events.push(format!("text:{text}"));
        }
        fn tool_use(&mut self, name: &str, _input: &serde_json::Value) {
            self.events.push(format!("tool:{name}"));
        }
        fn message_boundary(&mut self) {
            self.events.push("boundary".to_string());
        }
    }

    #[test]
    fn build_prompt_prefixes_positional_context() {
        let prompt = build_prompt("acme/widget", 42, "/data/acme/widget/42", "do the thing");
        assert_eq!(
            prompt,
            "REPOSITORY=acme/widget NUMBER=42 BASE_DIR=/data/acme/widget/42\ndo the thing"
        );
    }

    #[test]
    fn command_exists_is_false_for_bogus_binary() {
        assert!(!command_exists("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn raw_line_parses_system_init() {
        let line = json!({
            "type": "system",
            "subtype": "init",
            "model": "claude-opus",
            "permissionMode": "default",
            "tools": ["Read", "Edit"]
        })
        .to_string();
        let parsed: RawLine = serde_json::from_str(&line).unwrap();
        match parsed {
            RawLine::System { model, tools, .. } => {
                assert_eq!(model.as_deref(), Some("claude-opus"));
                assert_eq!(tools, vec!["Read".to_string(), "Edit".to_string()]);
            }
            _ => panic!("expected system line"),
        }
    }

    #[test]
    fn raw_line_parses_assistant_text_and_tool_use() {
        let line = json!({
            "type": "assistant",
            "message": {
                "id": "msg_1",
                "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "tool_use", "name": "Read", "input": {"path": "a.rs"}}
                ]
            }
        })
        .to_string();
        let parsed: RawLine = serde_json::from_str(&line).unwrap();
        match parsed {
            RawLine::Assistant { message } => {
                assert_eq!(message.id, "msg_1");
                assert_eq!(message.content.len(), 2);
            }
            _ => panic!("expected assistant line"),
        }
    }

    #[test]
    fn unrecognized_shape_falls_back_to_other() {
        let line = json!({"type": "result", "subtype": "success"}).to_string();
        let parsed: RawLine = serde_json::from_str(&line).unwrap();
        assert!(matches!(parsed, RawLine::Other));
    }

    #[test]
    fn recording_sink_sees_boundary_on_message_id_change() {
        let mut sink = RecordingSink::default();
        sink.session_started("claude-opus", "default", &["Read".to_string()]);
        sink.text("first");
        sink.message_boundary();
        sink.text("second");
        assert_eq!(
            sink.events,
            vec![
                "session:claude-opus:default:1".to_string(),
                "text:first".to_string(),
                "boundary".to_string(),
                "text:second".to_string(),
            ]
        );
    }

    #[test]
    fn full_transcript_renders_stable_snapshot() {
        let lines = [
            json!({
                "type": "system",
                "subtype": "init",
                "model": "claude-opus",
                "permissionMode": "default",
                "tools": ["Read", "Edit"]
            })
            .to_string(),
            json!({
                "type": "assistant",
                "message": {
                    "id": "msg_1",
                    "content": [{"type": "text", "text": "Looking at the issue now."}]
                }
            })
            .to_string(),
            json!({
                "type": "assistant",
                "message": {
                    "id": "msg_1",
                    "content": [
                        {"type": "tool_use", "name": "Read", "input": {"path": "src/lib.rs"}}
                    ]
                }
            })
            .to_string(),
            json!({
                "type": "assistant",
                "message": {
                    "id": "msg_2",
                    "content": [{"type": "text", "text": "Done."}]
                }
            })
            .to_string(),
            "not even json".to_string(),
        ];

        let mut sink = RecordingSink::default();
        let mut last_message_id = None;
        for line in &lines {
            process_ndjson_line(line, &mut sink, &mut last_message_id);
        }

        insta::assert_snapshot!(sink.events.join("\n"), @r###"
        session:claude-opus:default:2
        text:Looking at the issue now.
        tool:Read
        boundary
        text:Done.
        "###);
    }
}
