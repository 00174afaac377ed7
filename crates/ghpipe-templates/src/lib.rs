//! Hierarchical template lookup.
//!
//! Given a templates root, a repository slug, and an event name, the
//! resolver checks three levels in order and returns the first file it
//! finds, whether or not that file is a "skip sentinel" (empty or
//! whitespace-only content). A sentinel stops the search — it is a
//! deliberate "yes, handle this event, but do nothing", distinct from a
//! plain miss where the next level is still worth checking.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Outcome of resolving a template for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateResolution {
    /// A non-empty template file was found at this path.
    Found(PathBuf),
    /// A template file was found but its content is empty/whitespace-only.
    Skipped,
    /// No template file exists at any level of the hierarchy.
    Miss,
}

/// Resolve the template for `event` (e.g. `"github.pr.comment.new"`) in
/// `repository` (`"owner/name"`) under `templates_root`.
pub fn resolve_template(
    templates_root: &Path,
    repository: &str,
    event: &str,
) -> Result<TemplateResolution> {
    let (owner, name) = repository
        .split_once('/')
        .with_context(|| format!("repository slug {repository:?} is not owner/name"))?;

    let filename = format!("{event}.md");
    let candidates = [
        templates_root.join(owner).join(name).join(&filename),
        templates_root.join(owner).join(".default").join(&filename),
        templates_root.join(".default").join(&filename),
    ];

    for candidate in candidates {
        if !candidate.is_file() {
            continue;
        }
        let content = fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read template {}", candidate.display()))?;
        return Ok(if content.trim().is_empty() {
            TemplateResolution::Skipped
        } else {
            TemplateResolution::Found(candidate)
        });
    }

    Ok(TemplateResolution::Miss)
}
