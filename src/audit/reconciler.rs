//! Audit reconciliation
//!
//! Membership triggers (ban, unban, kick) often arrive before the audit log
//! has indexed the matching entry. Each trigger therefore polls the audit log
//! a bounded number of times, diffs the result against the cached snapshot by
//! entry id, and turns every genuinely new entry into a case. A ban that is
//! immediately reversed by a matching unban is folded into the ban's case as
//! a softban instead of opening a second case.
//!
//! All passes for one guild are serialized by a per-guild lock that is held
//! across the audit, store and channel round-trips, so an unban can never
//! observe a half-updated ban snapshot.

use crate::RECONCILE_TARGET;
use crate::audit::entry::{AuditAction, AuditEntry, SOFTBAN_LABEL, new_entries};
use crate::audit::error::{AuditResult, CaseStoreError};
use crate::audit::notice::{CaseNotice, NOTICE_TEMPLATE_VERSION};
use crate::audit::notifier::{Notifier, PostedMessage};
use crate::audit::record::{CaseAmendment, CaseRecord, NewCase};
use crate::audit::snapshot::{GuildSnapshot, SnapshotCache};
use crate::audit::source::AuditSource;
use crate::audit::store::CaseStore;
use chrono::Utc;
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Tuning for reconciliation passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Entries fetched and cached per action
    pub snapshot_size: u8,
    /// Polls per trigger
    pub retry_attempts: u32,
    /// Pause between polls that found nothing new
    pub retry_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            snapshot_size: 5,
            retry_attempts: 5,
            retry_interval: Duration::from_secs(3),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New entries were found and processed
    Processed {
        /// Ids of newly created cases
        created: Vec<u64>,
        /// Ids of existing cases rewritten as softbans
        softbanned: Vec<u64>,
    },
    /// The audit log never surfaced anything new within the retry budget
    NoNewEntries,
    /// The guild had no snapshot, or lost it mid-pass; nothing was diffed
    Untracked,
    /// An entry could not be recorded; only entries before it were kept
    Aborted {
        created: Vec<u64>,
        softbanned: Vec<u64>,
    },
}

/// What happened to a single new audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Created(u64),
    Softbanned(u64),
}

/// Keeps the snapshot cache, the case store and the log channel in step
#[derive(Clone)]
pub struct Reconciler {
    cache: SnapshotCache,
    store: CaseStore,
    source: Arc<dyn AuditSource>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<DashMap<GuildId, Arc<Mutex<()>>>>,
    ready: Arc<watch::Sender<bool>>,
    settings: ReconcileSettings,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cache", &self.cache)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: CaseStore,
        source: Arc<dyn AuditSource>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcileSettings,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            cache: SnapshotCache::new(),
            store,
            source,
            notifier,
            locks: Arc::new(DashMap::new()),
            ready: Arc::new(ready),
            settings,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    #[must_use]
    pub fn store(&self) -> &CaseStore {
        &self.store
    }

    /// Whether startup population has finished
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Let waiting reconciliation passes proceed
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Block until startup population has finished
    pub async fn wait_until_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn guild_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.locks.entry(guild_id).or_default().value().clone()
    }

    /// Populate every guild the bot is in, then signal readiness
    ///
    /// Guilds whose audit log cannot be read are skipped and stay untracked.
    pub async fn populate_guilds(&self, guild_ids: &[GuildId]) {
        for &guild_id in guild_ids {
            if let Err(e) = self.populate_guild(guild_id).await {
                warn!(
                    target: RECONCILE_TARGET,
                    guild_id = %guild_id,
                    error = %e,
                    "Skipping guild during population"
                );
            }
        }

        info!(
            target: RECONCILE_TARGET,
            tracked = self.cache.len(),
            requested = guild_ids.len(),
            "Snapshot cache populated"
        );
        self.mark_ready();
    }

    /// Take a fresh snapshot of one guild
    ///
    /// # Errors
    /// Returns an error if the case table cannot be provisioned or the audit
    /// log cannot be read.
    pub async fn populate_guild(&self, guild_id: GuildId) -> AuditResult<()> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        self.populate_guild_locked(guild_id).await
    }

    async fn populate_guild_locked(&self, guild_id: GuildId) -> AuditResult<()> {
        self.store.ensure_schema(guild_id)?;
        let log_channel = self.store.log_channel(guild_id)?;

        let mut entries = HashMap::new();
        for action in AuditAction::ALL {
            let fetched = self
                .source
                .fetch_recent(guild_id, action, self.settings.snapshot_size)
                .await?;
            debug!(
                target: RECONCILE_TARGET,
                guild_id = %guild_id,
                action = %action,
                count = fetched.len(),
                "Cached recent entries"
            );
            entries.insert(action, fetched);
        }

        self.cache.replace(
            guild_id,
            GuildSnapshot {
                entries,
                log_channel,
                refreshed_at: Utc::now(),
            },
        );
        info!(target: RECONCILE_TARGET, guild_id = %guild_id, "Guild snapshot taken");
        Ok(())
    }

    /// Forget a guild the bot is no longer part of
    pub fn evict_guild(&self, guild_id: GuildId) {
        // The lock entry stays so a pass still in flight keeps excluding new ones.
        if self.cache.evict(guild_id) {
            info!(target: RECONCILE_TARGET, guild_id = %guild_id, "Guild snapshot evicted");
        }
    }

    /// Set the log channel in both the store and the cache
    ///
    /// # Errors
    /// Returns an error if the setting cannot be stored.
    pub fn set_log_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> AuditResult<()> {
        self.store.set_log_channel(guild_id, channel_id)?;
        self.cache.set_channel(guild_id, channel_id);
        Ok(())
    }

    /// Run one reconciliation pass for a trigger
    pub async fn reconcile(&self, guild_id: GuildId, action: AuditAction) -> ReconcileOutcome {
        if !self.is_ready() {
            debug!(target: RECONCILE_TARGET, guild_id = %guild_id, "Waiting for snapshot population");
            self.wait_until_ready().await;
        }

        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;

        if !self.cache.is_tracked(guild_id) {
            // Diffing against an empty snapshot would make every entry look new.
            if let Err(e) = self.populate_guild_locked(guild_id).await {
                warn!(
                    target: RECONCILE_TARGET,
                    guild_id = %guild_id,
                    error = %e,
                    "Could not take snapshot for untracked guild"
                );
            }
            return ReconcileOutcome::Untracked;
        }

        let attempts = self.settings.retry_attempts;
        for attempt in 1..=attempts {
            let fresh = match self
                .source
                .fetch_recent(guild_id, action, self.settings.snapshot_size)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        target: RECONCILE_TARGET,
                        guild_id = %guild_id,
                        action = %action,
                        attempt,
                        error = %e,
                        "Audit log fetch failed"
                    );
                    Vec::new()
                }
            };

            let cached = self.cache.get(guild_id, action);
            let diff: Vec<AuditEntry> = new_entries(&fresh, &cached).into_iter().cloned().collect();

            if diff.is_empty() {
                debug!(
                    target: RECONCILE_TARGET,
                    guild_id = %guild_id,
                    action = %action,
                    attempt,
                    "No difference, retrying"
                );
                if attempt < attempts {
                    tokio::time::sleep(self.settings.retry_interval).await;
                    if !self.cache.is_tracked(guild_id) {
                        debug!(target: RECONCILE_TARGET, guild_id = %guild_id, "Guild evicted while retrying");
                        return ReconcileOutcome::Untracked;
                    }
                }
                continue;
            }

            let mut created = Vec::new();
            let mut softbanned = Vec::new();
            let mut persisted = Vec::with_capacity(diff.len());
            for entry in &diff {
                match self.record_entry(guild_id, entry).await {
                    Ok(EntryOutcome::Created(case_id)) => created.push(case_id),
                    Ok(EntryOutcome::Softbanned(case_id)) => softbanned.push(case_id),
                    Err(e) => {
                        error!(
                            target: RECONCILE_TARGET,
                            guild_id = %guild_id,
                            entry_id = entry.id,
                            error = %e,
                            "Failed to record audit entry, aborting pass"
                        );
                        // Unrecorded entries stay out of the snapshot so the
                        // next trigger sees them as new again.
                        persisted.extend(cached);
                        self.cache.set(guild_id, action, persisted);
                        return ReconcileOutcome::Aborted {
                            created,
                            softbanned,
                        };
                    }
                }
                persisted.push(entry.clone());
            }

            if !self.cache.set(guild_id, action, fresh) {
                debug!(target: RECONCILE_TARGET, guild_id = %guild_id, "Guild evicted during pass");
            }
            return ReconcileOutcome::Processed {
                created,
                softbanned,
            };
        }

        info!(
            target: RECONCILE_TARGET,
            guild_id = %guild_id,
            action = %action,
            attempts,
            "No new entries found, stopping"
        );
        ReconcileOutcome::NoNewEntries
    }

    /// Turn one new audit entry into a case, or fold it into a softban
    async fn record_entry(&self, guild_id: GuildId, entry: &AuditEntry) -> AuditResult<EntryOutcome> {
        if entry.action == AuditAction::Unban {
            if let Some(ban_case) = self.find_softban_case(guild_id, entry)? {
                let amendment = CaseAmendment::Reclassify {
                    action: SOFTBAN_LABEL.to_string(),
                    reason: entry.reason.clone(),
                };
                self.amend_case_locked(guild_id, ban_case.case_id, amendment)
                    .await?;
                info!(
                    target: RECONCILE_TARGET,
                    guild_id = %guild_id,
                    case_id = ban_case.case_id,
                    target_id = entry.target.id,
                    "Ban reclassified as softban"
                );
                return Ok(EntryOutcome::Softbanned(ban_case.case_id));
            }
        }

        self.create_case(guild_id, entry)
            .await
            .map(EntryOutcome::Created)
    }

    /// The case of a cached ban this unban reverses, if any
    ///
    /// Only the cached ban snapshot is consulted, so a ban older than the
    /// snapshot window is not recognized.
    fn find_softban_case(&self, guild_id: GuildId, unban: &AuditEntry) -> AuditResult<Option<CaseRecord>> {
        let cached_bans = self.cache.get(guild_id, AuditAction::Ban);
        if !cached_bans.iter().any(|ban| ban.matches_participants(unban)) {
            return Ok(None);
        }

        match self.store.find_latest_by(
            guild_id,
            unban.target.id,
            unban.moderator.id,
            unban.reason_or_default(),
        ) {
            Ok(found) => Ok(found),
            Err(CaseStoreError::MissingSchema(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_case(&self, guild_id: GuildId, entry: &AuditEntry) -> AuditResult<u64> {
        let notice = CaseNotice::provisional(entry);
        let channel_id = self.cache.channel(guild_id);

        let posted = match channel_id {
            Some(channel_id) => match self.notifier.post(channel_id, &notice.render()).await {
                Ok(message) => Some((channel_id, message)),
                Err(e) => {
                    warn!(
                        target: RECONCILE_TARGET,
                        guild_id = %guild_id,
                        channel_id = %channel_id,
                        error = %e,
                        "Could not post case notice"
                    );
                    None
                }
            },
            None => None,
        };

        let case = NewCase {
            action: entry.action.label(),
            target_id: entry.target.id,
            moderator_id: entry.moderator.id,
            reason: entry.reason_or_default().to_string(),
            message_id: posted.as_ref().map(|(_, message)| message.id.get()),
        };
        let case_id = self.insert_case(guild_id, &case)?;

        info!(
            target: RECONCILE_TARGET,
            guild_id = %guild_id,
            case_id,
            action = %case.action,
            target_id = case.target_id,
            moderator_id = case.moderator_id,
            template = NOTICE_TEMPLATE_VERSION,
            "Case recorded"
        );

        if let Some((channel_id, message)) = posted {
            self.finalize_notice(channel_id, &message, case_id).await;
        }
        Ok(case_id)
    }

    /// Insert a case, provisioning the guild table once if it is missing
    fn insert_case(&self, guild_id: GuildId, case: &NewCase) -> AuditResult<u64> {
        match self.store.insert(guild_id, case) {
            Ok(case_id) => Ok(case_id),
            Err(CaseStoreError::MissingSchema(_)) => {
                warn!(
                    target: RECONCILE_TARGET,
                    guild_id = %guild_id,
                    "Case table missing, provisioning and retrying once"
                );
                self.store.ensure_schema(guild_id)?;
                Ok(self.store.insert(guild_id, case)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Swap the provisional case id in a just-posted notice for the real one
    async fn finalize_notice(&self, channel_id: ChannelId, message: &PostedMessage, case_id: u64) {
        let Some(notice) = CaseNotice::parse(&message.content) else {
            warn!(
                target: RECONCILE_TARGET,
                message_id = %message.id,
                "Posted notice did not parse, leaving provisional case id"
            );
            return;
        };

        let content = notice.with_case_id(case_id).render();
        if let Err(e) = self.notifier.edit(channel_id, message.id, &content).await {
            warn!(
                target: RECONCILE_TARGET,
                message_id = %message.id,
                case_id,
                error = %e,
                "Could not edit case notice"
            );
        }
    }

    /// Change a stored case and mirror the change into its notice
    ///
    /// A notice that was deleted or cannot be read is skipped; the stored
    /// case is updated regardless.
    ///
    /// Runs under the guild lock, so it never interleaves with a pass that
    /// edits the same notice.
    ///
    /// # Errors
    /// Returns an error if the case does not exist or the store update fails.
    pub async fn amend_case(
        &self,
        guild_id: GuildId,
        case_id: u64,
        amendment: CaseAmendment,
    ) -> AuditResult<CaseRecord> {
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        self.amend_case_locked(guild_id, case_id, amendment).await
    }

    async fn amend_case_locked(
        &self,
        guild_id: GuildId,
        case_id: u64,
        amendment: CaseAmendment,
    ) -> AuditResult<CaseRecord> {
        let mut record = self
            .store
            .find_by_case_id(guild_id, case_id)?
            .ok_or(CaseStoreError::CaseNotFound { guild_id, case_id })?;

        match &amendment {
            CaseAmendment::Reason(reason) => {
                self.store.update_reason(guild_id, case_id, reason)?;
                record.reason.clone_from(reason);
            }
            CaseAmendment::Reclassify { action, reason } => {
                self.store.update_action(guild_id, case_id, action)?;
                record.action.clone_from(action);
                if let Some(reason) = reason {
                    self.store.update_reason(guild_id, case_id, reason)?;
                    record.reason.clone_from(reason);
                }
            }
        }

        let channel_id = self.cache.channel(guild_id);
        let message_id = record.message_id.filter(|id| *id != 0).map(MessageId::new);
        if let (Some(channel_id), Some(message_id)) = (channel_id, message_id) {
            self.rerender_notice(channel_id, message_id, &amendment).await;
        }

        Ok(record)
    }

    async fn rerender_notice(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        amendment: &CaseAmendment,
    ) {
        let content = match self.notifier.fetch_content(channel_id, message_id).await {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    target: RECONCILE_TARGET,
                    message_id = %message_id,
                    error = %e,
                    "Case notice unavailable, skipping re-render"
                );
                return;
            }
        };

        let Some(notice) = CaseNotice::parse(&content) else {
            warn!(
                target: RECONCILE_TARGET,
                message_id = %message_id,
                "Case notice did not parse, skipping re-render"
            );
            return;
        };

        let notice = match amendment {
            CaseAmendment::Reason(reason) => notice.with_reason(reason.as_str()),
            CaseAmendment::Reclassify { action, reason } => {
                let notice = notice.with_action(action.as_str());
                match reason {
                    Some(reason) => notice.with_reason(reason.as_str()),
                    None => notice,
                }
            }
        };

        if let Err(e) = self.notifier.edit(channel_id, message_id, &notice.render()).await {
            warn!(
                target: RECONCILE_TARGET,
                message_id = %message_id,
                error = %e,
                "Could not edit case notice"
            );
        }
    }
}
