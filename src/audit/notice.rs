//! Case notification text
//!
//! Notifications posted to the log channel use a fixed template that can be
//! parsed back into its fields. Later edits (true case id, softban, new
//! reason) re-parse the posted text, swap one field, and render again, so the
//! untouched fields survive byte-for-byte.

use crate::audit::entry::AuditEntry;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

/// Revision of the notice layout below
pub const NOTICE_TEMPLATE_VERSION: u32 = 1;

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Case id shown before the store has assigned one
pub const PROVISIONAL_CASE_ID: u64 = 0;

static NOTICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\*\*ACTION\*\*:\s(?P<action>[^\n]+?)\s\|",
        r"\s\*\*CASE\*\*:\s(?P<case_id>\d+)\s```apache\n",
        r"User:\s(?P<target>[^\n]+)\n",
        r"Moderator:\s(?P<moderator>[^\n]+)\n",
        r"Reason:\s(?P<reason>(?s:.+?))\n```",
    ))
    .expect("notice pattern is valid")
});

/// The five fields of a rendered case notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseNotice {
    pub action: String,
    pub case_id: u64,
    /// Rendered target, `label (id)`
    pub target: String,
    /// Rendered moderator, `label (id)`
    pub moderator: String,
    pub reason: String,
}

impl CaseNotice {
    /// Notice for a freshly observed entry, before it has a case id
    #[must_use]
    pub fn provisional(entry: &AuditEntry) -> Self {
        Self {
            action: entry.action.label(),
            case_id: PROVISIONAL_CASE_ID,
            target: entry.target.to_string(),
            moderator: entry.moderator.to_string(),
            reason: entry.reason_or_default().to_string(),
        }
    }

    /// Recover the fields from previously rendered text
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        let captures = NOTICE_PATTERN.captures(content)?;
        Some(Self {
            action: captures["action"].to_string(),
            case_id: captures["case_id"].parse().ok()?,
            target: captures["target"].to_string(),
            moderator: captures["moderator"].to_string(),
            reason: captures["reason"].to_string(),
        })
    }

    #[must_use]
    pub fn with_case_id(mut self, case_id: u64) -> Self {
        self.case_id = case_id;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Render the notice text
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CaseNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "**ACTION**: {} | **CASE**: {} ```apache\nUser: {}\nModerator: {}\nReason: {}\n```",
            self.action,
            self.case_id,
            self.target,
            self.moderator,
            fence_safe(&self.reason)
        )
    }
}

/// Break up backtick runs so a reason can never close the code block early
///
/// Output contains no two adjacent backticks, so it passes through unchanged.
fn fence_safe(text: &str) -> Cow<'_, str> {
    if !text.contains("``") {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut previous = None;
    for c in text.chars() {
        if c == '`' && previous == Some('`') {
            out.push(ZERO_WIDTH_SPACE);
        }
        out.push(c);
        previous = Some(c);
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{AuditAction, Identity};

    fn ban_entry(reason: Option<&str>) -> AuditEntry {
        AuditEntry {
            id: 1,
            action: AuditAction::Ban,
            target: Identity::new(111, "troll#1234"),
            moderator: Identity::new(222, "helper"),
            reason: reason.map(ToString::to_string),
        }
    }

    #[test]
    fn test_render_layout() {
        let notice = CaseNotice::provisional(&ban_entry(Some("spam")));
        assert_eq!(
            notice.render(),
            "**ACTION**: BAN | **CASE**: 0 ```apache\n\
             User: troll#1234 (111)\n\
             Moderator: helper (222)\n\
             Reason: spam\n```"
        );
    }

    #[test]
    fn test_missing_reason_renders_placeholder() {
        let notice = CaseNotice::provisional(&ban_entry(None));
        assert_eq!(notice.reason, "N/A");
        assert!(notice.render().contains("Reason: N/A\n"));
    }

    #[test]
    fn test_case_id_update_preserves_other_fields() {
        let posted = CaseNotice::provisional(&ban_entry(Some("spam | and  more: stuff"))).render();

        let parsed = CaseNotice::parse(&posted).expect("posted notice should parse");
        let edited = parsed.with_case_id(42).render();

        let reparsed = CaseNotice::parse(&edited).expect("edited notice should parse");
        assert_eq!(reparsed.case_id, 42);
        assert_eq!(reparsed.action, "BAN");
        assert_eq!(reparsed.target, "troll#1234 (111)");
        assert_eq!(reparsed.moderator, "helper (222)");
        assert_eq!(reparsed.reason, "spam | and  more: stuff");
        assert_eq!(edited.replace("**CASE**: 42", "**CASE**: 0"), posted);
    }

    #[test]
    fn test_multiline_reason_survives_parse() {
        let posted = CaseNotice::provisional(&ban_entry(Some("line one\nline two"))).render();
        let parsed = CaseNotice::parse(&posted).expect("posted notice should parse");
        assert_eq!(parsed.reason, "line one\nline two");
    }

    #[test]
    fn test_reclassify_and_reason_edit() {
        let posted = CaseNotice::provisional(&ban_entry(Some("spam")))
            .with_case_id(3)
            .render();
        let edited = CaseNotice::parse(&posted)
            .expect("posted notice should parse")
            .with_action("SOFTBAN")
            .with_reason("cleanup")
            .render();

        assert!(edited.starts_with("**ACTION**: SOFTBAN | **CASE**: 3 "));
        assert!(edited.contains("Reason: cleanup\n"));
        assert!(edited.contains("User: troll#1234 (111)\n"));
    }

    #[test]
    fn test_backtick_fence_in_reason_is_kept_whole() {
        let posted =
            CaseNotice::provisional(&ban_entry(Some("pasted\n```\nrm -rf /\n```\nagain"))).render();
        assert_eq!(posted.matches("```").count(), 2);

        let parsed = CaseNotice::parse(&posted).expect("posted notice should parse");
        assert!(parsed.reason.starts_with("pasted\n`"));
        assert!(parsed.reason.ends_with("\nagain"));
        assert!(!parsed.reason.contains("``"));

        let edited = parsed.with_case_id(5).render();
        assert_eq!(edited.replace("**CASE**: 5", "**CASE**: 0"), posted);
    }

    #[test]
    fn test_fence_safe() {
        assert!(matches!(fence_safe("plain `code`"), Cow::Borrowed("plain `code`")));
        assert_eq!(fence_safe("`````"), "`\u{200B}`\u{200B}`\u{200B}`\u{200B}`");
        let once = fence_safe("a```b").into_owned();
        assert_eq!(fence_safe(&once), once);
    }

    #[test]
    fn test_parse_rejects_foreign_text() {
        assert!(CaseNotice::parse("hello there").is_none());
        assert!(CaseNotice::parse("**ACTION**: BAN | **CASE**: x ```apache\n").is_none());
    }
}
