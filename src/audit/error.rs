//! Error types for the audit reconciliation system
//!
//! Storage failures are kept apart from the rest so the reconciler can tell a
//! missing guild table (recoverable) from a real database fault.

use poise::serenity_prelude::GuildId;
use thiserror::Error;

/// Errors raised by the case store
#[derive(Debug, Error)]
pub enum CaseStoreError {
    /// The per-guild case table has not been provisioned yet
    #[error("No case table for guild {0}")]
    MissingSchema(GuildId),

    /// No case with this id exists in the guild
    #[error("Case {case_id} not found in guild {guild_id}")]
    CaseNotFound { guild_id: GuildId, case_id: u64 },

    /// The store connection was poisoned by a panicking writer
    #[error("Case store connection poisoned")]
    Poisoned,

    /// The database directory could not be created
    #[error("Case store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for case store operations
pub type StoreResult<T> = Result<T, CaseStoreError>;

/// Errors that can occur while reconciling or editing cases
#[derive(Debug, Error)]
pub enum AuditError {
    /// Case store failure
    #[error(transparent)]
    Store(#[from] CaseStoreError),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// Malformed input from a command invocation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error
    #[error("Audit error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for AuditError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for AuditError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

impl AuditError {
    /// Whether this error is the store reporting an unknown case id
    #[must_use]
    pub fn is_case_not_found(&self) -> bool {
        matches!(self, Self::Store(CaseStoreError::CaseNotFound { .. }))
    }
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;
