//! Case records
//!
//! A case is the durable, canonical record of one moderation action. Its id
//! is assigned by the store and only ever grows within a guild.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record of a moderation case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Per-guild case number
    pub case_id: u64,
    /// Action label, e.g. `BAN` or `SOFTBAN`
    pub action: String,
    /// User the action was taken against
    pub target_id: u64,
    /// User who took the action
    pub moderator_id: u64,
    pub reason: String,
    /// Notification message mirroring this case, if one was posted
    pub message_id: Option<u64>,
}

/// Field values for a case that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCase {
    pub action: String,
    pub target_id: u64,
    pub moderator_id: u64,
    pub reason: String,
    pub message_id: Option<u64>,
}

/// A change requested to an existing case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseAmendment {
    /// Replace the reason only
    Reason(String),
    /// Rewrite the action label, optionally replacing the reason as well
    Reclassify {
        action: String,
        reason: Option<String>,
    },
}

impl CaseRecord {
    /// Short listing line used by the `last` command
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "Case: {:>4} | Action: {:>7} | User: {}",
            self.case_id, self.action, self.target_id
        )
    }

    /// Short listing line used by the `user` command
    #[must_use]
    pub fn reason_line(&self) -> String {
        format!(
            "Case: {:>4} | Action: {:>7} | Reason: {}",
            self.case_id, self.action, self.reason
        )
    }
}

impl fmt::Display for CaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Action: {}\nUser: {}\nModerator: {}\nReason: {}",
            self.action, self.target_id, self.moderator_id, self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CaseRecord {
        CaseRecord {
            case_id: 12,
            action: "BAN".to_string(),
            target_id: 111,
            moderator_id: 222,
            reason: "spam".to_string(),
            message_id: None,
        }
    }

    #[test]
    fn test_listing_lines() {
        let record = record();
        assert_eq!(record.summary_line(), "Case:   12 | Action:     BAN | User: 111");
        assert_eq!(record.reason_line(), "Case:   12 | Action:     BAN | Reason: spam");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            record().to_string(),
            "Action: BAN\nUser: 111\nModerator: 222\nReason: spam"
        );
    }
}
