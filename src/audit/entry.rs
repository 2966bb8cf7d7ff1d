//! Audit entry types
//!
//! This module defines the moderation actions the bot follows and the
//! read-only view of a single audit log entry.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serenity::model::guild::audit_log::{Action, MemberAction};

/// Label written for a ban that was immediately reversed
pub const SOFTBAN_LABEL: &str = "SOFTBAN";

/// Reason text stored and rendered when the audit entry has none
pub const NO_REASON: &str = "N/A";

/// Membership-affecting action kinds tracked from the audit log
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[display("BAN")]
    Ban,
    #[display("UNBAN")]
    Unban,
    #[display("KICK")]
    Kick,
}

impl AuditAction {
    /// Every tracked action, in population order
    pub const ALL: [Self; 3] = [Self::Ban, Self::Unban, Self::Kick];

    /// The case label stored for this action
    #[must_use]
    pub fn label(self) -> String {
        self.to_string()
    }

    /// The audit log filter used to query this action
    #[must_use]
    pub fn as_audit_filter(self) -> Action {
        match self {
            Self::Ban => Action::Member(MemberAction::BanAdd),
            Self::Unban => Action::Member(MemberAction::BanRemove),
            Self::Kick => Action::Member(MemberAction::Kick),
        }
    }

    /// Map an audit log action back to a tracked action
    #[must_use]
    pub fn from_audit_action(action: &Action) -> Option<Self> {
        match action {
            Action::Member(MemberAction::BanAdd) => Some(Self::Ban),
            Action::Member(MemberAction::BanRemove) => Some(Self::Unban),
            Action::Member(MemberAction::Kick) => Some(Self::Kick),
            _ => None,
        }
    }
}

/// A user as shown in a notification: display label plus id
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[display("{label} ({id})")]
pub struct Identity {
    pub id: u64,
    pub label: String,
}

impl Identity {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Identity for a user the audit log did not resolve
    #[must_use]
    pub fn unresolved(id: u64) -> Self {
        Self::new(id, id.to_string())
    }
}

/// One entry of the external audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Audit log entry id; unique within the source for its lifetime
    pub id: u64,
    pub action: AuditAction,
    pub target: Identity,
    pub moderator: Identity,
    pub reason: Option<String>,
}

impl AuditEntry {
    /// Reason as stored and rendered
    #[must_use]
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or(NO_REASON)
    }

    /// Whether `other` describes the same target, moderator and reason
    #[must_use]
    pub fn matches_participants(&self, other: &Self) -> bool {
        self.target.id == other.target.id
            && self.moderator.id == other.moderator.id
            && self.reason == other.reason
    }
}

/// Entries of `fresh` whose id does not appear in `cached`, in `fresh` order
#[must_use]
pub fn new_entries<'a>(fresh: &'a [AuditEntry], cached: &[AuditEntry]) -> Vec<&'a AuditEntry> {
    fresh
        .iter()
        .filter(|entry| !cached.iter().any(|seen| seen.id == entry.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, action: AuditAction, reason: Option<&str>) -> AuditEntry {
        AuditEntry {
            id,
            action,
            target: Identity::new(100, "target#0001"),
            moderator: Identity::new(200, "mod#0002"),
            reason: reason.map(ToString::to_string),
        }
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(AuditAction::Ban.label(), "BAN");
        assert_eq!(AuditAction::Unban.label(), "UNBAN");
        assert_eq!(AuditAction::Kick.label(), "KICK");
    }

    #[test]
    fn test_audit_filter_mapping() {
        for action in AuditAction::ALL {
            let filter = action.as_audit_filter();
            assert_eq!(AuditAction::from_audit_action(&filter), Some(action));
        }
        assert_eq!(
            AuditAction::from_audit_action(&Action::Member(MemberAction::Update)),
            None
        );
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new(5, "someone").to_string(), "someone (5)");
        assert_eq!(Identity::unresolved(5).to_string(), "5 (5)");
    }

    #[test]
    fn test_new_entries_by_id_not_fields() {
        let cached = vec![entry(1, AuditAction::Ban, Some("spam"))];
        // Same fields as the cached entry, different id: still new
        let fresh = vec![
            entry(2, AuditAction::Ban, Some("spam")),
            entry(1, AuditAction::Ban, Some("edited reason")),
        ];

        let diff = new_entries(&fresh, &cached);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].id, 2);
    }

    #[test]
    fn test_matches_participants() {
        let ban = entry(1, AuditAction::Ban, Some("spam"));
        let unban = entry(2, AuditAction::Unban, Some("spam"));
        assert!(ban.matches_participants(&unban));

        let other_reason = entry(3, AuditAction::Unban, None);
        assert!(!ban.matches_participants(&other_reason));
        assert_eq!(other_reason.reason_or_default(), NO_REASON);
    }
}
