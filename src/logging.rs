use crate::{COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error, RECONCILE_TARGET};
use poise::serenity_prelude::GuildId;
use poise::{Context, FrameworkError};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Reconciliation log file name
pub const RECONCILE_LOG_FILE: &str = "reconcile";

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,serenity=error";

/// Initialize the logging system with console and file outputs
pub fn init() -> Result<(), Error> {
    // Create log directory if it doesn't exist
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, COMMAND_LOG_FILE);
    let reconcile_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, RECONCILE_LOG_FILE);

    // Create a layer for console output (human-readable format)
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Create a layer for command logs (JSON format)
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file);

    // Case bookkeeping gets its own file so it can be audited on its own
    let reconcile_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(reconcile_file)
        .with_filter(filter_fn(|metadata| {
            metadata.target() == RECONCILE_TARGET
        }));

    // Use env filter to allow runtime configuration of log levels
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(reconcile_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Guild id for log fields, `DM` outside guilds
#[must_use]
pub fn guild_label(guild_id: Option<GuildId>) -> String {
    guild_id.map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

// Store command start time in the context data
thread_local! {
    static COMMAND_START_TIME: std::cell::RefCell<Option<Instant>> = const { std::cell::RefCell::new(None) };
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_, Data, Error>) {
    COMMAND_START_TIME.with(|cell| {
        *cell.borrow_mut() = Some(Instant::now());
    });

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        format!("{:?}", ctx.invocation_string())
    };

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration =
        COMMAND_START_TIME.with(|cell| cell.borrow_mut().take().map(|start| start.elapsed()));

    let duration_ms = u64::try_from(duration.map_or(0, |d| d.as_millis())).unwrap_or_default();
    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            info!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                input = ?input,
                error = %error,
                "Command arguments rejected"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let error_msg = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);

            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                error = %error_msg,
                "Command check failed"
            );
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            info!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                missing = ?missing_permissions,
                "Command refused, missing permissions"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error = ?err,
                "Other framework error"
            );
        }
    }
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
