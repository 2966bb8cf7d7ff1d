use std::{env, sync::Arc};

use audit_ledger::{BOT_NAME, BotConfig, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let config = BotConfig::load().await;
    info!(
        database = %config.database_path.display(),
        prefix = %config.command_prefix,
        "Configuration loaded"
    );

    // Audit reads and notice edits go through their own HTTP handle; the
    // reconciler exists before the gateway connects.
    let http = Arc::new(serenity::Http::new(&token));
    let data = Data::connect(config.clone(), &http)?;

    let framework_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.clone()),
                ..Default::default()
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    // Tell the invoker what went wrong
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Failed to report command error: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler)
        .type_map_insert::<Data>(data)
        .framework(framework)
        .await?;

    info!("Starting {BOT_NAME}...");
    client.start().await?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return;
        }
    };

    // Handle any errors that occurred during execution
    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
