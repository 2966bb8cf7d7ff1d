//! Audit source adapter
//!
//! The audit log offers no push notifications and no ordering guarantee
//! across calls beyond "recent entries for this action"; this adapter just
//! reads it.

use crate::audit::entry::{AuditAction, AuditEntry, Identity};
use crate::audit::error::AuditResult;
use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, Http, UserId};
use std::sync::Arc;
use tracing::debug;

/// Read access to a guild's audit log
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSource: Send + Sync {
    /// Up to `limit` most recent entries for `action`, most recent first
    async fn fetch_recent(
        &self,
        guild_id: GuildId,
        action: AuditAction,
        limit: u8,
    ) -> AuditResult<Vec<AuditEntry>>;
}

/// Audit source backed by the Discord HTTP API
pub struct SerenityAuditSource {
    http: Arc<Http>,
}

impl SerenityAuditSource {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl AuditSource for SerenityAuditSource {
    async fn fetch_recent(
        &self,
        guild_id: GuildId,
        action: AuditAction,
        limit: u8,
    ) -> AuditResult<Vec<AuditEntry>> {
        let logs = guild_id
            .audit_logs(
                self.http.as_ref(),
                Some(action.as_audit_filter()),
                None,
                None,
                Some(limit),
            )
            .await?;

        let identity = |id: u64| {
            logs.users
                .get(&UserId::new(id))
                .map_or_else(|| Identity::unresolved(id), |user| Identity::new(id, user.tag()))
        };

        let entries = logs
            .entries
            .iter()
            .filter_map(|entry| {
                let kind = AuditAction::from_audit_action(&entry.action)?;
                let target_id = entry.target_id?.get();
                Some(AuditEntry {
                    id: entry.id.get(),
                    action: kind,
                    target: identity(target_id),
                    moderator: identity(entry.user_id.get()),
                    reason: entry.reason.clone(),
                })
            })
            .collect::<Vec<_>>();

        debug!(
            guild_id = %guild_id,
            action = %action,
            count = entries.len(),
            "Fetched audit log entries"
        );
        Ok(entries)
    }
}
