//! Filesystem-as-database state store.
//!
//! Tree layout: `<base>/<owner>/<name>/<number>/` holds a handful of
//! marker files (`.active`, `.type`, `.last_checked`,
//! `.last_issue_comment_check`, `.last_pr_comment_check`). Everything in
//! this crate is plain, best-effort file I/O — no network, no locking
//! beyond what the OS gives a single writer for free.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ghpipe_types::Kind;

pub const ACTIVE_FILE: &str = ".active";
pub const TYPE_FILE: &str = ".type";
pub const LAST_CHECKED_FILE: &str = ".last_checked";
pub const LAST_ISSUE_COMMENT_CHECK_FILE: &str = ".last_issue_comment_check";
pub const LAST_PR_COMMENT_CHECK_FILE: &str = ".last_pr_comment_check";

/// The three watermarks tracked per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkKind {
    Item,
    IssueComment,
    PrComment,
}

impl WatermarkKind {
    fn filename(self) -> &'static str {
        match self {
            WatermarkKind::Item => LAST_CHECKED_FILE,
            WatermarkKind::IssueComment => LAST_ISSUE_COMMENT_CHECK_FILE,
            WatermarkKind::PrComment => LAST_PR_COMMENT_CHECK_FILE,
        }
    }

    /// The comment watermark that corresponds to a given item [`Kind`].
    pub fn for_comment_kind(kind: Kind) -> Self {
        match kind {
            Kind::Issue => WatermarkKind::IssueComment,
            Kind::Pr => WatermarkKind::PrComment,
        }
    }
}

/// Path to an item's directory: `<base>/<owner>/<name>/<number>/`.
pub fn item_dir(base: &Path, repository: &str, number: &str) -> PathBuf {
    base.join(repository).join(number)
}

/// Create the item directory if it does not already exist.
pub fn create_item_dir(base: &Path, repository: &str, number: &str) -> Result<PathBuf> {
    let dir = item_dir(base, repository, number);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create item directory {}", dir.display()))?;
    Ok(dir)
}

/// `true` if the item directory already exists on disk.
pub fn item_dir_exists(base: &Path, repository: &str, number: &str) -> bool {
    item_dir(base, repository, number).is_dir()
}

/// `true` if the item carries a `.active` marker.
pub fn is_active(base: &Path, repository: &str, number: &str) -> bool {
    item_dir(base, repository, number).join(ACTIVE_FILE).is_file()
}

/// Remove the `.active` marker. Returns `Ok(true)` if a file was removed,
/// `Ok(false)` if it was already absent (the caller should log a warning,
/// not an error, in that case).
pub fn remove_active_file(base: &Path, repository: &str, number: &str) -> Result<bool> {
    let path = item_dir(base, repository, number).join(ACTIVE_FILE);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)
        .with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

/// Read the cached classification for an item, if any.
pub fn read_kind(base: &Path, repository: &str, number: &str) -> Result<Option<Kind>> {
    let path = item_dir(base, repository, number).join(TYPE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let kind = trimmed
        .parse::<Kind>()
        .with_context(|| format!("invalid kind {trimmed:?} in {}", path.display()))?;
    Ok(Some(kind))
}

/// Write the classification for an item. Idempotent: if `.type` already
/// holds a value, this is a no-op — classification is assigned at most
/// once and is immutable thereafter.
pub fn write_kind(base: &Path, repository: &str, number: &str, kind: Kind) -> Result<()> {
    if read_kind(base, repository, number)?.is_some() {
        return Ok(());
    }
    let dir = create_item_dir(base, repository, number)?;
    let path = dir.join(TYPE_FILE);
    fs::write(&path, kind.as_str())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Read a watermark timestamp. A missing file means "never checked".
pub fn read_watermark(
    base: &Path,
    repository: &str,
    number: &str,
    kind: WatermarkKind,
) -> Result<Option<DateTime<Utc>>> {
    let path = item_dir(base, repository, number).join(kind.filename());
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .with_context(|| format!("invalid timestamp {trimmed:?} in {}", path.display()))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

/// Write a watermark timestamp, creating parent directories as needed.
pub fn write_watermark(
    base: &Path,
    repository: &str,
    number: &str,
    kind: WatermarkKind,
    value: DateTime<Utc>,
) -> Result<()> {
    let dir = create_item_dir(base, repository, number)?;
    let path = dir.join(kind.filename());
    fs::write(&path, value.to_rfc3339())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Walk the tree exactly two levels beneath `base` (`<owner>/<name>/<number>`)
/// and return every item directory found, optionally filtered by
/// `.active` presence and by an explicit repository allow-list.
pub fn list_items(
    base: &Path,
    active_only: bool,
    repo_filter: Option<&[String]>,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    if !base.is_dir() {
        return Ok(out);
    }

    for owner_entry in fs::read_dir(base)
        .with_context(|| format!("failed to read base directory {}", base.display()))?
    {
        let owner_entry = owner_entry?;
        if !owner_entry.file_type()?.is_dir() {
            continue;
        }
        let owner_name = owner_entry.file_name();
        let Some(owner) = owner_name.to_str() else {
            continue;
        };
        if owner.starts_with('.') {
            continue;
        }

        for name_entry in fs::read_dir(owner_entry.path())
            .with_context(|| format!("failed to read owner directory {}", owner_entry.path().display()))?
        {
            let name_entry = name_entry?;
            if !name_entry.file_type()?.is_dir() {
                continue;
            }
            let name_os = name_entry.file_name();
            let Some(name) = name_os.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let repository = format!("{owner}/{name}");
            if let Some(filter) = repo_filter {
                if !filter.iter().any(|r| r == &repository) {
                    continue;
                }
            }

            for number_entry in fs::read_dir(name_entry.path())
                .with_context(|| format!("failed to read repo directory {}", name_entry.path().display()))?
            {
                let number_entry = number_entry?;
                if !number_entry.file_type()?.is_dir() {
                    continue;
                }
                let number_os = number_entry.file_name();
                let Some(number) = number_os.to_str() else {
                    continue;
                };
                if number.parse::<u64>().is_err() {
                    continue;
                }
                if active_only && !number_entry.path().join(ACTIVE_FILE).is_file() {
                    continue;
                }
                out.push((repository.clone(), number.to_string()));
            }
        }
    }

    Ok(out)
}

/// Repositories currently tracked: every `<owner>/<name>` directory that
/// exists under `base`, regardless of whether it holds any items. Used as
/// the monitor's repository list when `--repositories` is not given.
pub fn discover_repositories(base: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !base.is_dir() {
        return Ok(out);
    }

    for owner_entry in fs::read_dir(base)
        .with_context(|| format!("failed to read base directory {}", base.display()))?
    {
        let owner_entry = owner_entry?;
        if !owner_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(owner) = owner_entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if owner.starts_with('.') {
            continue;
        }

        for name_entry in fs::read_dir(owner_entry.path())
            .with_context(|| format!("failed to read owner directory {}", owner_entry.path().display()))?
        {
            let name_entry = name_entry?;
            if !name_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = name_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            out.push(format!("{owner}/{name}"));
        }
    }

    Ok(out)
}

/// Minimum comment watermark across all items of `kind` in `repository`.
/// `None` means no item of that kind has ever been comment-checked.
pub fn repo_earliest_comment_watermark(
    base: &Path,
    repository: &str,
    kind: Kind,
) -> Result<Option<DateTime<Utc>>> {
    let watermark_kind = WatermarkKind::for_comment_kind(kind);
    let repo_dir = base.join(repository);
    if !repo_dir.is_dir() {
        return Ok(None);
    }

    let mut earliest: Option<DateTime<Utc>> = None;
    for number_entry in fs::read_dir(&repo_dir)
        .with_context(|| format!("failed to read repo directory {}", repo_dir.display()))?
    {
        let number_entry = number_entry?;
        if !number_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(number) = number_entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if number.parse::<u64>().is_err() {
            continue;
        }
        if read_kind(base, repository, &number)? != Some(kind) {
            continue;
        }
        match read_watermark(base, repository, &number, watermark_kind)? {
            None => return Ok(None),
            Some(ts) => {
                earliest = Some(match earliest {
                    Some(current) if current <= ts => current,
                    _ => ts,
                });
            }
        }
    }

    Ok(earliest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn read_watermark_missing_file_is_none() {
        let td = tempdir().unwrap();
        let result = read_watermark(td.path(), "acme/widget", "7", WatermarkKind::Item).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn write_then_read_watermark_round_trips() {
        let td = tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        write_watermark(td.path(), "acme/widget", "7", WatermarkKind::Item, ts).unwrap();
        let read = read_watermark(td.path(), "acme/widget", "7", WatermarkKind::Item).unwrap();
        assert_eq!(read, Some(ts));
    }

    #[test]
    fn write_kind_is_idempotent() {
        let td = tempdir().unwrap();
        write_kind(td.path(), "acme/widget", "7", Kind::Issue).unwrap();
        write_kind(td.path(), "acme/widget", "7", Kind::Pr).unwrap();
        let kind = read_kind(td.path(), "acme/widget", "7").unwrap();
        assert_eq!(kind, Some(Kind::Issue));
    }

    #[test]
    fn remove_active_file_reports_absence() {
        let td = tempdir().unwrap();
        create_item_dir(td.path(), "acme/widget", "7").unwrap();
        assert_eq!(remove_active_file(td.path(), "acme/widget", "7").unwrap(), false);

        let active_path = item_dir(td.path(), "acme/widget", "7").join(ACTIVE_FILE);
        fs::write(&active_path, "").unwrap();
        assert_eq!(remove_active_file(td.path(), "acme/widget", "7").unwrap(), true);
        assert!(!active_path.exists());
    }

    #[test]
    fn list_items_walks_two_levels_and_filters_active() {
        let td = tempdir().unwrap();
        create_item_dir(td.path(), "acme/widget", "7").unwrap();
        create_item_dir(td.path(), "acme/widget", "8").unwrap();
        fs::write(item_dir(td.path(), "acme/widget", "7").join(ACTIVE_FILE), "").unwrap();

        let all = list_items(td.path(), false, None).unwrap();
        assert_eq!(all.len(), 2);

        let active = list_items(td.path(), true, None).unwrap();
        assert_eq!(active, vec![("acme/widget".to_string(), "7".to_string())]);
    }

    #[test]
    fn list_items_respects_repo_filter() {
        let td = tempdir().unwrap();
        create_item_dir(td.path(), "acme/widget", "7").unwrap();
        create_item_dir(td.path(), "acme/gadget", "9").unwrap();

        let filtered = list_items(td.path(), false, Some(&["acme/widget".to_string()])).unwrap();
        assert_eq!(filtered, vec![("acme/widget".to_string(), "7".to_string())]);
    }

    #[test]
    fn repo_earliest_comment_watermark_is_none_when_any_item_unchecked() {
        let td = tempdir().unwrap();
        write_kind(td.path(), "acme/widget", "7", Kind::Issue).unwrap();
        write_kind(td.path(), "acme/widget", "8", Kind::Issue).unwrap();
        write_watermark(
            td.path(),
            "acme/widget",
            "7",
            WatermarkKind::IssueComment,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();

        let earliest =
            repo_earliest_comment_watermark(td.path(), "acme/widget", Kind::Issue).unwrap();
        assert_eq!(earliest, None);
    }

    #[test]
    fn repo_earliest_comment_watermark_picks_minimum() {
        let td = tempdir().unwrap();
        write_kind(td.path(), "acme/widget", "7", Kind::Issue).unwrap();
        write_kind(td.path(), "acme/widget", "8", Kind::Issue).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        write_watermark(td.path(), "acme/widget", "7", WatermarkKind::IssueComment, later).unwrap();
        write_watermark(td.path(), "acme/widget", "8", WatermarkKind::IssueComment, earlier).unwrap();

        let earliest =
            repo_earliest_comment_watermark(td.path(), "acme/widget", Kind::Issue).unwrap();
        assert_eq!(earliest, Some(earlier));
    }
}
