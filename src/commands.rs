use crate::audit::{AuditError, CaseAmendment, CaseRecord, CaseStoreError, Identity, StoreResult};
use crate::{Context, Error};
use poise::command;
use poise::serenity_prelude::{self as serenity, Permissions, UserId};

/// Default number of cases listed by `last`
pub const DEFAULT_LAST_ENTRIES: u32 = 10;
/// Default number of cases listed by `user`
pub const DEFAULT_USER_ENTRIES: u32 = 5;
/// Upper bound for any listing
pub const MAX_ENTRIES: u32 = 20;

const NO_RECORDS: &str = "No database record found.";

/// Every command registered by the bot
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![settings(), last(), case(), reason(), user()]
}

/// Moderators can ban or kick
#[must_use]
pub fn has_moderator_permissions(permissions: Permissions) -> bool {
    permissions.ban_members() || permissions.kick_members()
}

async fn is_moderator(ctx: Context<'_>) -> Result<bool, Error> {
    let Some(member) = ctx.author_member().await else {
        return Ok(false);
    };
    let permissions = ctx
        .guild()
        .map(|guild| guild.member_permissions(&member));
    Ok(permissions.is_some_and(has_moderator_permissions))
}

/// Clamp a requested listing size to `1..=MAX_ENTRIES`
#[must_use]
pub fn clamp_entries(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_ENTRIES)
}

/// Parse a user mention (`<@id>`, `<@!id>`) or a raw numeric id
///
/// # Errors
/// Returns [`AuditError::InvalidInput`] when neither form matches.
pub fn parse_user_ref(input: &str) -> Result<UserId, AuditError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map_or(trimmed, |inner| inner.trim_start_matches('!'));

    digits
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
        .ok_or_else(|| AuditError::InvalidInput("ID not valid".to_string()))
}

/// A guild without a case table simply has no cases yet
fn or_empty<T: Default>(result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Err(CaseStoreError::MissingSchema(_)) => Ok(T::default()),
        other => other,
    }
}

fn describe_user(ctx: Context<'_>, id: u64) -> String {
    ctx.cache()
        .user(UserId::new(id))
        .map_or_else(|| id.to_string(), |user| Identity::new(id, user.tag()).to_string())
}

#[must_use]
pub fn format_last(guild_name: &str, records: &[CaseRecord]) -> String {
    let lines = records
        .iter()
        .map(CaseRecord::summary_line)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Last {} records for guild {guild_name}.\n```apache\n{lines}\n```",
        records.len()
    )
}

#[must_use]
pub fn format_user_history(user_id: UserId, records: &[CaseRecord], total: u64) -> String {
    let lines = records
        .iter()
        .map(CaseRecord::reason_line)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Last {} records for user {user_id}, {total} in total.\n```apache\n{lines}\n```\n\
         Find information about a case by running `case <case_id>`.",
        records.len()
    )
}

#[must_use]
pub fn format_case(record: &CaseRecord, target: &str, moderator: &str) -> String {
    format!(
        "Information about Case ID {}\n```apache\nAction: {}\nUser: {target}\nModerator: {moderator}\nReason: {}\n```",
        record.case_id, record.action, record.reason
    )
}

/// Shows the log channel and snapshot state of this server.
#[command(
    prefix_command,
    slash_command,
    guild_only,
    subcommands("logs"),
    required_permissions = "MANAGE_GUILD",
    check = "is_moderator"
)]
pub async fn settings(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let reconciler = &ctx.data().reconciler;

    let channel = reconciler
        .store()
        .log_channel(guild_id)?
        .map_or_else(|| "not set".to_string(), |id| format!("<#{id}> ({id})"));
    let snapshot = reconciler.cache().refreshed_at(guild_id).map_or_else(
        || "not taken".to_string(),
        |at| format!("<t:{}:R>", at.timestamp()),
    );

    ctx.say(format!("Logs channel: {channel}\nAudit snapshot: {snapshot}"))
        .await?;
    Ok(())
}

/// Sets the logs channel where new cases are posted.
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    check = "is_moderator"
)]
pub async fn logs(
    ctx: Context<'_>,
    #[description = "Channel for case notifications"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    ctx.data().reconciler.set_log_channel(guild_id, channel.id)?;
    ctx.say(":ok_hand:").await?;
    Ok(())
}

/// Shows the last N cases from this server.
///
/// You can list up to 20 records. Defaults to 10.
#[command(prefix_command, slash_command, guild_only, check = "is_moderator")]
pub async fn last(
    ctx: Context<'_>,
    #[description = "Number of cases"] entries: Option<u32>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let limit = clamp_entries(entries, DEFAULT_LAST_ENTRIES);
    let records = or_empty(ctx.data().reconciler.store().list_recent(guild_id, limit))?;

    if records.is_empty() {
        ctx.say(NO_RECORDS).await?;
        return Ok(());
    }

    let guild_name = ctx
        .guild()
        .map_or_else(|| guild_id.to_string(), |guild| guild.name.clone());
    ctx.say(format_last(&guild_name, &records)).await?;
    Ok(())
}

/// Shows information about a case from this server.
#[command(prefix_command, slash_command, guild_only, check = "is_moderator")]
pub async fn case(
    ctx: Context<'_>,
    #[description = "Case number"] case_id: u64,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let record = or_empty(
        ctx.data()
            .reconciler
            .store()
            .find_by_case_id(guild_id, case_id),
    )?;

    let Some(record) = record else {
        ctx.say(NO_RECORDS).await?;
        return Ok(());
    };

    let target = describe_user(ctx, record.target_id);
    let moderator = describe_user(ctx, record.moderator_id);
    ctx.say(format_case(&record, &target, &moderator)).await?;
    Ok(())
}

/// Edits the reason of a case from this server.
#[command(prefix_command, slash_command, guild_only, check = "is_moderator")]
pub async fn reason(
    ctx: Context<'_>,
    #[description = "Case number"] case_id: u64,
    #[description = "New reason"]
    #[rest]
    reason: String,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };

    match ctx
        .data()
        .reconciler
        .amend_case(guild_id, case_id, CaseAmendment::Reason(reason))
        .await
    {
        Ok(_) => {
            ctx.say(":ok_hand:").await?;
        }
        Err(e) if e.is_case_not_found() => {
            ctx.say("No case ID found.").await?;
        }
        Err(AuditError::Store(CaseStoreError::MissingSchema(_))) => {
            ctx.say("No case ID found.").await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Shows the last N cases for a user from this server.
///
/// You can list up to 20 records. Defaults to 5.
#[command(prefix_command, slash_command, guild_only, check = "is_moderator")]
pub async fn user(
    ctx: Context<'_>,
    #[description = "Member, mention or user id"] member: String,
    #[description = "Number of cases"] entries: Option<u32>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };

    let user_id = match parse_user_ref(&member) {
        Ok(id) => id,
        Err(e) => ctx
            .guild()
            .and_then(|guild| guild.member_named(&member).map(|m| m.user.id))
            .ok_or(e)?,
    };

    let limit = clamp_entries(entries, DEFAULT_USER_ENTRIES);
    let (records, total) = or_empty(ctx.data().reconciler.store().list_recent_for_target(
        guild_id,
        user_id.get(),
        limit,
    ))?;

    if records.is_empty() {
        ctx.say(NO_RECORDS).await?;
        return Ok(());
    }

    ctx.say(format_user_history(user_id, &records, total)).await?;
    Ok(())
}
