//! Ambient pieces shared by `ghpipe-monitor` and `ghpipe-handler`.
//!
//! There is no shared orchestration logic here — the two binaries run very
//! different cycles. What they do share is how they report progress and
//! (for the handler) how they gate an LLM invocation behind an operator
//! keystroke.

use anyhow::Result;
use console::{Key, Term};
use ghpipe_types::Reporter;

/// The sole `Reporter` implementation that ships in this pipeline. Printed
/// to stderr so stdout stays free for the LLM transcript.
#[derive(Default)]
pub struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Outcome of the interactive confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Proceed,
    Skip,
    Abort,
}

/// Read a single keystroke from the terminal: Enter proceeds, `s`/`S`
/// skips, Ctrl-C aborts. Any other key re-prompts. Used by the handler
/// before invoking the LLM, unless `--auto-confirm` is set.
pub fn confirm_single_keystroke(term: &Term, prompt: &str) -> Result<Confirmation> {
    loop {
        term.write_str(prompt)?;
        match term.read_key()? {
            Key::Enter => return Ok(Confirmation::Proceed),
            Key::Char('s') | Key::Char('S') => return Ok(Confirmation::Skip),
            Key::CtrlC => return Ok(Confirmation::Abort),
            _ => continue,
        }
    }
}
