//! Domain types shared between the monitor and handler binaries.
//!
//! Everything here is plain data: tagged sum types for the two kinds of
//! tracked GitHub items, the comment shape, and the event envelopes that
//! travel over the stream. None of it talks to the network or the
//! filesystem — see `ghpipe-github`, `ghpipe-state`, and `ghpipe-stream`
//! for that.

use serde::{Deserialize, Serialize};

/// Ambient logging surface. Every component takes `&mut dyn Reporter`
/// instead of writing to stdout/stderr directly; each binary supplies its
/// own CLI-level implementation (bracketed `[info]`/`[warn]`/`[error]`
/// lines to stderr), and tests supply a collecting double.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Sentinel used when GitHub returns a null author (e.g. a deleted account).
pub const GHOST_AUTHOR: &str = "ghost";

/// Repository slug of the form `"owner/name"`.
pub type RepoSlug = String;

/// The two closed variants of trackable GitHub item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Issue,
    Pr,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Issue => "issue",
            Kind::Pr => "pr",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(Kind::Issue),
            "pr" => Ok(Kind::Pr),
            other => Err(KindParseError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized item kind: {0:?}")]
pub struct KindParseError(String);

/// An open issue or pull request, normalized from GitHub's GraphQL response shape.
///
/// Field names match the wire/event schema exactly (snake_case), so this
/// struct doubles as the serde shape for `*.new`/`*.updated` event bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub author: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,

    // PR-only fields. Always present (as null) on PR items, always absent on issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mergeable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_decision: Option<String>,
}

/// Maximum number of assignees/labels kept per item (matches the GraphQL `first: 10`).
pub const MAX_ASSIGNEES: usize = 10;
pub const MAX_LABELS: usize = 10;

/// A single reaction on a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub content: String,
    pub user: String,
}

/// Reaction summary attached to a comment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reactions {
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<Reaction>,
}

/// A top-level comment on an issue or PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub database_id: i64,
    pub url: String,
    pub author: String,
    pub author_association: String,
    pub body: String,
    pub body_text: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub published_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_minimized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimized_reason: Option<String>,
    pub reactions: Reactions,
}

/// The action half of an event subject: `github.<domain>.<action>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    New,
    Updated,
    Closed,
    CommentNew,
}

/// A fully-qualified event subject, e.g. `github.issue.comment.new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSubject {
    pub kind: Kind,
    pub action: EventAction,
}

impl EventSubject {
    pub const fn new(kind: Kind, action: EventAction) -> Self {
        Self { kind, action }
    }

    /// Render the NATS subject string, e.g. `github.pr.comment.new`.
    pub fn as_subject(self) -> String {
        let action = match self.action {
            EventAction::New => "new",
            EventAction::Updated => "updated",
            EventAction::Closed => "closed",
            EventAction::CommentNew => "comment.new",
        };
        format!("github.{}.{}", self.kind.as_str(), action)
    }

    /// Parse a subject string, accepting the legacy `github.issue.process`
    /// alias (routed to `github.issue.updated`).
    pub fn parse(subject: &str) -> Option<Self> {
        if subject == "github.issue.process" {
            return Some(Self::new(Kind::Issue, EventAction::Updated));
        }
        let rest = subject.strip_prefix("github.")?;
        let (kind_str, action_str) = rest.split_once('.')?;
        let kind: Kind = kind_str.parse().ok()?;
        let action = match action_str {
            "new" => EventAction::New,
            "updated" => EventAction::Updated,
            "closed" => EventAction::Closed,
            "comment.new" => EventAction::CommentNew,
            _ => return None,
        };
        Some(Self::new(kind, action))
    }
}

impl std::fmt::Display for EventSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_subject())
    }
}

/// Envelope for `*.new` / `*.updated` / `*.closed` events: the item fields
/// inlined alongside the required `repository`/`number` pair.
///
/// `item` is `None` for `*.closed` events: by the time a closure is
/// detected, the item no longer appears in GitHub's open-items response, so
/// there is no fresh data to inline — only `repository`/`number` travel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEventEnvelope {
    pub repository: String,
    pub number: String,
    #[serde(flatten)]
    pub item: Option<TrackedItem>,
}

/// Envelope for `*.comment.new` events. Carries the legacy `issue_number`/
/// `pr_number` key (equal to `number`) alongside the comment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEventEnvelope {
    pub repository: String,
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<String>,
    #[serde(flatten)]
    pub comment: Comment,
}

impl CommentEventEnvelope {
    /// Build the envelope for `kind`, populating the legacy per-kind key.
    pub fn new(kind: Kind, repository: String, number: String, comment: Comment) -> Self {
        let (issue_number, pr_number) = match kind {
            Kind::Issue => (Some(number.clone()), None),
            Kind::Pr => (None, Some(number.clone())),
        };
        Self {
            repository,
            number,
            issue_number,
            pr_number,
            comment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips() {
        for (kind, action) in [
            (Kind::Issue, EventAction::New),
            (Kind::Issue, EventAction::Updated),
            (Kind::Issue, EventAction::Closed),
            (Kind::Issue, EventAction::CommentNew),
            (Kind::Pr, EventAction::New),
            (Kind::Pr, EventAction::Updated),
            (Kind::Pr, EventAction::Closed),
            (Kind::Pr, EventAction::CommentNew),
        ] {
            let subject = EventSubject::new(kind, action);
            let rendered = subject.as_subject();
            let parsed = EventSubject::parse(&rendered).expect("parse");
            assert_eq!(parsed, subject);
        }
    }

    #[test]
    fn legacy_process_subject_aliases_issue_updated() {
        let parsed = EventSubject::parse("github.issue.process").expect("parse");
        assert_eq!(parsed, EventSubject::new(Kind::Issue, EventAction::Updated));
    }

    #[test]
    fn unknown_subject_does_not_parse() {
        assert!(EventSubject::parse("github.issue.renamed").is_none());
        assert!(EventSubject::parse("totally.unrelated").is_none());
    }

    #[test]
    fn kind_from_str_rejects_garbage() {
        assert!("issue".parse::<Kind>().is_ok());
        assert!("pr".parse::<Kind>().is_ok());
        assert!("epic".parse::<Kind>().is_err());
    }

    #[test]
    fn comment_envelope_sets_legacy_key_by_kind() {
        let comment = sample_comment();
        let issue_env =
            CommentEventEnvelope::new(Kind::Issue, "acme/widget".into(), "7".into(), comment.clone());
        assert_eq!(issue_env.issue_number.as_deref(), Some("7"));
        assert_eq!(issue_env.pr_number, None);

        let pr_env = CommentEventEnvelope::new(Kind::Pr, "acme/widget".into(), "7".into(), comment);
        assert_eq!(pr_env.pr_number.as_deref(), Some("7"));
        assert_eq!(pr_env.issue_number, None);
    }

    #[test]
    fn item_envelope_flattens_item_fields_at_top_level() {
        let item = sample_item();
        let env = ItemEventEnvelope {
            repository: "acme/widget".into(),
            number: "7".into(),
            item: Some(item),
        };
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["repository"], "acme/widget");
        assert_eq!(json["number"], "7");
        assert_eq!(json["title"], "Sample");
        assert!(json.get("item").is_none());
    }

    #[test]
    fn closed_event_envelope_carries_no_item_fields() {
        let env = ItemEventEnvelope {
            repository: "acme/widget".into(),
            number: "7".into(),
            item: None,
        };
        let json = serde_json::to_value(&env).expect("serialize");
        assert_eq!(json["repository"], "acme/widget");
        assert_eq!(json["number"], "7");
        assert!(json.get("title").is_none());
    }

    fn sample_item() -> TrackedItem {
        TrackedItem {
            title: "Sample".into(),
            body: "body".into(),
            url: "https://github.com/acme/widget/issues/7".into(),
            state: "OPEN".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            closed_at: None,
            author: GHOST_AUTHOR.into(),
            assignees: vec![],
            labels: vec![],
            merged_at: None,
            is_draft: None,
            mergeable: None,
            review_decision: None,
        }
    }

    fn sample_comment() -> Comment {
        Comment {
            id: "c1".into(),
            database_id: 1,
            url: "https://github.com/acme/widget/issues/7#issuecomment-1".into(),
            author: "octocat".into(),
            author_association: "MEMBER".into(),
            body: "hi".into(),
            body_text: "hi".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            published_at: chrono::Utc::now(),
            last_edited_at: None,
            is_minimized: false,
            minimized_reason: None,
            reactions: Reactions::default(),
        }
    }
}
