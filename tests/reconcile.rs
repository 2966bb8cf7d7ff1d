use async_trait::async_trait;
use audit_ledger::audit::{
    AuditAction, AuditEntry, AuditError, AuditResult, AuditSource, CaseAmendment, CaseStore,
    Identity, Notifier, PostedMessage, ReconcileOutcome, ReconcileSettings, Reconciler,
};
use poise::serenity_prelude::{ChannelId, GuildId, MessageId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GUILD: GuildId = GuildId::new(500);
const LOG_CHANNEL: ChannelId = ChannelId::new(600);
const TARGET: u64 = 111;
const MODERATOR: u64 = 222;

/// Audit log that tests append to, newest first
#[derive(Default)]
struct ScriptedAuditLog {
    entries: Mutex<HashMap<AuditAction, Vec<AuditEntry>>>,
    next_id: AtomicU64,
    fetches: AtomicU64,
}

impl ScriptedAuditLog {
    fn record(&self, action: AuditAction, target: u64, reason: Option<&str>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = AuditEntry {
            id,
            action,
            target: Identity::new(target, format!("user{target}")),
            moderator: Identity::new(MODERATOR, "moderator"),
            reason: reason.map(ToString::to_string),
        };
        self.entries
            .lock()
            .unwrap()
            .entry(action)
            .or_default()
            .insert(0, entry);
        id
    }

    fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSource for ScriptedAuditLog {
    async fn fetch_recent(
        &self,
        _guild_id: GuildId,
        action: AuditAction,
        limit: u8,
    ) -> AuditResult<Vec<AuditEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&action)
            .map(|list| list.iter().take(usize::from(limit)).cloned().collect())
            .unwrap_or_default())
    }
}

/// Log channel kept in memory
#[derive(Default)]
struct MemoryChannel {
    messages: Mutex<HashMap<MessageId, String>>,
    posted: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MemoryChannel {
    fn content(&self, id: u64) -> Option<String> {
        self.messages.lock().unwrap().get(&MessageId::new(id)).cloned()
    }

    fn delete(&self, id: u64) {
        self.messages.lock().unwrap().remove(&MessageId::new(id));
    }

    fn posted(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MemoryChannel {
    async fn post(&self, _channel_id: ChannelId, content: &str) -> AuditResult<PostedMessage> {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.messages.lock().unwrap().insert(id, content.to_string());
        self.posted.lock().unwrap().push(content.to_string());
        Ok(PostedMessage {
            id,
            content: content.to_string(),
        })
    }

    async fn fetch_content(&self, _channel_id: ChannelId, message_id: MessageId) -> AuditResult<String> {
        self.messages
            .lock()
            .unwrap()
            .get(&message_id)
            .cloned()
            .ok_or_else(|| AuditError::Other("Unknown Message".to_string()))
    }

    async fn edit(&self, _channel_id: ChannelId, message_id: MessageId, content: &str) -> AuditResult<()> {
        match self.messages.lock().unwrap().get_mut(&message_id) {
            Some(existing) => {
                *existing = content.to_string();
                Ok(())
            }
            None => Err(AuditError::Other("Unknown Message".to_string())),
        }
    }
}

struct Harness {
    log: Arc<ScriptedAuditLog>,
    channel: Arc<MemoryChannel>,
    reconciler: Reconciler,
}

async fn harness(settings: ReconcileSettings) -> Harness {
    let log = Arc::new(ScriptedAuditLog::default());
    let channel = Arc::new(MemoryChannel::default());
    let store = CaseStore::open_in_memory().unwrap();
    store.set_log_channel(GUILD, LOG_CHANNEL).unwrap();

    let reconciler = Reconciler::new(store, log.clone(), channel.clone(), settings);
    reconciler.populate_guilds(&[GUILD]).await;
    Harness {
        log,
        channel,
        reconciler,
    }
}

fn created(outcome: &ReconcileOutcome) -> Vec<u64> {
    match outcome {
        ReconcileOutcome::Processed { created, .. } => created.clone(),
        _ => Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn ban_is_posted_then_numbered() {
    let h = harness(ReconcileSettings::default()).await;

    h.log.record(AuditAction::Ban, TARGET, Some("spam"));
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Ban).await;
    assert_eq!(created(&outcome), vec![1]);

    let case = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(case.action, "BAN");
    assert_eq!(case.target_id, TARGET);
    assert_eq!(case.moderator_id, MODERATOR);
    assert_eq!(case.reason, "spam");
    assert_eq!(case.message_id, Some(1));

    let posted = h.channel.posted();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].contains("**CASE**: 0 "));
    assert_eq!(
        h.channel.content(1).unwrap(),
        "**ACTION**: BAN | **CASE**: 1 ```apache\n\
         User: user111 (111)\n\
         Moderator: moderator (222)\n\
         Reason: spam\n```"
    );
}

#[tokio::test(start_paused = true)]
async fn matching_unban_turns_ban_into_softban() {
    let h = harness(ReconcileSettings::default()).await;

    h.log.record(AuditAction::Ban, TARGET, Some("spam"));
    h.reconciler.reconcile(GUILD, AuditAction::Ban).await;

    h.log.record(AuditAction::Unban, TARGET, Some("spam"));
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Unban).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Processed {
            created: vec![],
            softbanned: vec![1]
        }
    );

    let case = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(case.action, "SOFTBAN");
    assert!(h.reconciler.store().find_by_case_id(GUILD, 2).unwrap().is_none());
    assert!(h.channel.content(1).unwrap().starts_with("**ACTION**: SOFTBAN | **CASE**: 1 "));
    assert_eq!(h.channel.posted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unban_without_ban_is_its_own_case() {
    let h = harness(ReconcileSettings::default()).await;

    h.log.record(AuditAction::Unban, TARGET, None);
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Unban).await;
    assert_eq!(created(&outcome), vec![1]);

    let case = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(case.action, "UNBAN");
    assert_eq!(case.reason, "N/A");
}

#[tokio::test(start_paused = true)]
async fn unban_for_another_reason_is_not_a_softban() {
    let h = harness(ReconcileSettings::default()).await;

    h.log.record(AuditAction::Ban, TARGET, Some("spam"));
    h.reconciler.reconcile(GUILD, AuditAction::Ban).await;

    h.log.record(AuditAction::Unban, TARGET, Some("appeal accepted"));
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Unban).await;
    assert_eq!(created(&outcome), vec![2]);
    let ban = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(ban.action, "BAN");
}

#[tokio::test(start_paused = true)]
async fn ban_outside_snapshot_window_is_not_correlated() {
    let settings = ReconcileSettings {
        snapshot_size: 1,
        ..Default::default()
    };
    let h = harness(settings).await;

    h.log.record(AuditAction::Ban, TARGET, Some("spam"));
    h.reconciler.reconcile(GUILD, AuditAction::Ban).await;
    h.log.record(AuditAction::Ban, 333, Some("raid"));
    h.reconciler.reconcile(GUILD, AuditAction::Ban).await;

    // The first ban has been pushed out of the one-entry snapshot.
    h.log.record(AuditAction::Unban, TARGET, Some("spam"));
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Unban).await;
    assert_eq!(created(&outcome), vec![3]);
    let ban = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(ban.action, "BAN");
}

#[tokio::test(start_paused = true)]
async fn silent_audit_log_changes_nothing() {
    let h = harness(ReconcileSettings::default()).await;
    h.log.record(AuditAction::Kick, TARGET, None);
    h.reconciler.reconcile(GUILD, AuditAction::Kick).await;
    let snapshot = h.reconciler.cache().get(GUILD, AuditAction::Kick);
    let fetches = h.log.fetches();

    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Kick).await;
    assert_eq!(outcome, ReconcileOutcome::NoNewEntries);
    assert_eq!(h.log.fetches() - fetches, 5);
    assert_eq!(h.reconciler.cache().get(GUILD, AuditAction::Kick), snapshot);
    assert!(h.reconciler.store().find_by_case_id(GUILD, 2).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn late_entry_is_picked_up_by_a_retry() {
    let h = harness(ReconcileSettings::default()).await;

    let pending = tokio::spawn({
        let reconciler = h.reconciler.clone();
        async move { reconciler.reconcile(GUILD, AuditAction::Kick).await }
    });

    // Let two polls come back empty before the entry is indexed.
    tokio::time::sleep(Duration::from_secs(4)).await;
    h.log.record(AuditAction::Kick, TARGET, Some("flood"));

    let outcome = pending.await.unwrap();
    assert_eq!(created(&outcome), vec![1]);
    let case = h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap();
    assert_eq!(case.action, "KICK");
    assert_eq!(case.reason, "flood");
}

#[tokio::test(start_paused = true)]
async fn case_ids_grow_per_guild() {
    let h = harness(ReconcileSettings::default()).await;

    let mut ids = Vec::new();
    for target in [1, 2, 3] {
        h.log.record(AuditAction::Kick, target, None);
        let outcome = h.reconciler.reconcile(GUILD, AuditAction::Kick).await;
        ids.extend(created(&outcome));
    }
    assert_eq!(ids, vec![1, 2, 3]);

    let listed: Vec<u64> = h
        .reconciler
        .store()
        .list_recent(GUILD, 10)
        .unwrap()
        .iter()
        .map(|case| case.case_id)
        .collect();
    assert_eq!(listed, vec![3, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn several_new_entries_in_one_pass() {
    let h = harness(ReconcileSettings::default()).await;

    h.log.record(AuditAction::Ban, 1, Some("a"));
    h.log.record(AuditAction::Ban, 2, Some("b"));
    let outcome = h.reconciler.reconcile(GUILD, AuditAction::Ban).await;
    assert_eq!(created(&outcome).len(), 2);
    assert_eq!(h.reconciler.cache().get(GUILD, AuditAction::Ban).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reason_edit_rewrites_notice_and_survives_deletion() {
    let h = harness(ReconcileSettings::default()).await;
    h.log.record(AuditAction::Ban, TARGET, Some("spam"));
    h.reconciler.reconcile(GUILD, AuditAction::Ban).await;

    h.reconciler
        .amend_case(GUILD, 1, CaseAmendment::Reason("line one\nline two".to_string()))
        .await
        .unwrap();
    let content = h.channel.content(1).unwrap();
    assert!(content.contains("User: user111 (111)\n"));
    assert!(content.ends_with("Reason: line one\nline two\n```"));

    h.channel.delete(1);
    let record = h
        .reconciler
        .amend_case(GUILD, 1, CaseAmendment::Reason("final".to_string()))
        .await
        .unwrap();
    assert_eq!(record.reason, "final");
    assert_eq!(
        h.reconciler.store().find_by_case_id(GUILD, 1).unwrap().unwrap().reason,
        "final"
    );
}

#[tokio::test(start_paused = true)]
async fn new_guild_is_snapshotted_not_diffed() {
    let h = harness(ReconcileSettings::default()).await;
    let other = GuildId::new(501);

    h.log.record(AuditAction::Ban, TARGET, Some("old ban"));
    let outcome = h.reconciler.reconcile(other, AuditAction::Ban).await;
    assert_eq!(outcome, ReconcileOutcome::Untracked);
    assert!(h.reconciler.cache().is_tracked(other));
    assert!(h.reconciler.store().list_recent(other, 10).unwrap().is_empty());
}
