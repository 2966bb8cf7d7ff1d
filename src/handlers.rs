use crate::audit::{AuditAction, ReconcileOutcome};
use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, Member, Ready, UnavailableGuild, User,
};
use tracing::{debug, info, warn};

pub struct Handler;

impl Handler {
    async fn trigger(&self, ctx: &Context, guild_id: GuildId, action: AuditAction, user: &User) {
        let Some(data) = Data::from_context(ctx).await else {
            warn!(target: EVENT_TARGET, "Shared data missing, ignoring {action} trigger");
            return;
        };

        debug!(
            target: EVENT_TARGET,
            guild_id = %guild_id,
            user_id = %user.id,
            action = %action,
            "Membership trigger received"
        );

        match data.reconciler.reconcile(guild_id, action).await {
            ReconcileOutcome::Processed {
                created,
                softbanned,
            } => info!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                action = %action,
                created = ?created,
                softbanned = ?softbanned,
                "Audit entries reconciled"
            ),
            ReconcileOutcome::NoNewEntries => debug!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                action = %action,
                "Trigger had no matching audit entry"
            ),
            ReconcileOutcome::Aborted {
                created,
                softbanned,
            } => warn!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                action = %action,
                created = ?created,
                softbanned = ?softbanned,
                "Reconciliation aborted, remaining entries left for the next trigger"
            ),
            ReconcileOutcome::Untracked => info!(
                target: EVENT_TARGET,
                guild_id = %guild_id,
                "Guild was untracked, snapshot taken instead"
            ),
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count = guilds.len();
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");

        let Some(data) = Data::from_context(&ctx).await else {
            warn!(target: EVENT_TARGET, "Shared data missing, snapshots not taken");
            return;
        };
        if data.reconciler.is_ready() {
            debug!(target: EVENT_TARGET, "Snapshots already taken, skipping population");
            return;
        }
        data.reconciler.populate_guilds(&guilds).await;
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new != Some(true) {
            return;
        }
        let Some(data) = Data::from_context(&ctx).await else {
            return;
        };

        info!(target: EVENT_TARGET, guild_id = %guild.id, name = %guild.name, "Joined guild");
        if let Err(e) = data.reconciler.populate_guild(guild.id).await {
            warn!(
                target: EVENT_TARGET,
                guild_id = %guild.id,
                error = %e,
                "Could not take snapshot of new guild"
            );
        }
    }

    async fn guild_delete(&self, ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage also surfaces here; only a real removal drops the snapshot.
        if incomplete.unavailable {
            return;
        }
        if let Some(data) = Data::from_context(&ctx).await {
            info!(target: EVENT_TARGET, guild_id = %incomplete.id, "Left guild");
            data.reconciler.evict_guild(incomplete.id);
        }
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        self.trigger(&ctx, guild_id, AuditAction::Ban, &banned_user).await;
    }

    async fn guild_ban_removal(&self, ctx: Context, guild_id: GuildId, unbanned_user: User) {
        self.trigger(&ctx, guild_id, AuditAction::Unban, &unbanned_user).await;
    }

    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        // Voluntary leaves trigger too; they simply never produce a kick entry.
        self.trigger(&ctx, guild_id, AuditAction::Kick, &user).await;
    }
}
