//! Snapshot cache
//!
//! Holds, per guild, the most recent audit entries seen for each tracked
//! action and the guild's log channel. Freshness is entirely caller-driven:
//! nothing here expires on its own.

use crate::audit::entry::{AuditAction, AuditEntry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId};
use std::collections::HashMap;
use std::sync::Arc;

/// Last observed state of one guild
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    /// Last fetched entries per action, most recent first
    pub entries: HashMap<AuditAction, Vec<AuditEntry>>,
    /// Channel where case notifications are posted
    pub log_channel: Option<ChannelId>,
    /// When the guild was last populated from the audit log
    pub refreshed_at: DateTime<Utc>,
}

impl Default for GuildSnapshot {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            log_channel: None,
            refreshed_at: Utc::now(),
        }
    }
}

/// Cache of guild snapshots, one map entry per guild
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    guilds: Arc<DashMap<GuildId, GuildSnapshot>>,
}

impl SnapshotCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entries for an action; empty if the guild was never seen
    #[must_use]
    pub fn get(&self, guild_id: GuildId, action: AuditAction) -> Vec<AuditEntry> {
        self.guilds
            .get(&guild_id)
            .and_then(|snapshot| snapshot.entries.get(&action).cloned())
            .unwrap_or_default()
    }

    /// Replace the cached entries for an action of a tracked guild
    ///
    /// Returns `false`, leaving the cache untouched, if the guild is untracked.
    pub fn set(&self, guild_id: GuildId, action: AuditAction, entries: Vec<AuditEntry>) -> bool {
        match self.guilds.get_mut(&guild_id) {
            Some(mut snapshot) => {
                snapshot.entries.insert(action, entries);
                true
            }
            None => false,
        }
    }

    /// Install a freshly populated snapshot for a guild
    pub fn replace(&self, guild_id: GuildId, snapshot: GuildSnapshot) {
        self.guilds.insert(guild_id, snapshot);
    }

    /// The guild's log channel, if configured
    #[must_use]
    pub fn channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.guilds
            .get(&guild_id)
            .and_then(|snapshot| snapshot.log_channel)
    }

    /// Update the log channel of a tracked guild
    ///
    /// Untracked guilds are left alone; their channel is picked up from the
    /// store when they are populated.
    pub fn set_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        if let Some(mut snapshot) = self.guilds.get_mut(&guild_id) {
            snapshot.log_channel = Some(channel_id);
        }
    }

    /// When the guild was last populated
    #[must_use]
    pub fn refreshed_at(&self, guild_id: GuildId) -> Option<DateTime<Utc>> {
        self.guilds.get(&guild_id).map(|snapshot| snapshot.refreshed_at)
    }

    /// Whether the guild has been populated
    #[must_use]
    pub fn is_tracked(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// Drop everything known about a guild
    pub fn evict(&self, guild_id: GuildId) -> bool {
        self.guilds.remove(&guild_id).is_some()
    }

    /// Number of tracked guilds
    #[must_use]
    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }
}
