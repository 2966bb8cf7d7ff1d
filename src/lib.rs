pub mod audit;
pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;

pub const BOT_NAME: &str = "audit_ledger";
pub const COMMAND_TARGET: &str = "audit_ledger::command";
pub const ERROR_TARGET: &str = "audit_ledger::error";
pub const EVENT_TARGET: &str = "audit_ledger::handlers";
pub const RECONCILE_TARGET: &str = "audit_ledger::reconcile";
pub const CONSOLE_TARGET: &str = "audit_ledger";

pub use config::BotConfig;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
