//! Case store
//!
//! Durable per-guild case tables in SQLite. Each guild gets its own table so
//! that `AUTOINCREMENT` hands out a monotonic, never reused case id per guild.
//! The table is provisioned lazily; queries against a guild that has none
//! report [`CaseStoreError::MissingSchema`] instead of a raw SQLite error.

use crate::audit::error::{CaseStoreError, StoreResult};
use crate::audit::record::{CaseRecord, NewCase};
use poise::serenity_prelude::{ChannelId, GuildId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SETTINGS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS settings (
        guild_id INTEGER PRIMARY KEY,
        channel_id INTEGER
    );
";

const CASE_COLUMNS: &str = "case_id, action, target_id, moderator_id, reason, message_id";

/// Store for case records and guild settings
#[derive(Clone)]
pub struct CaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for CaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseStore").finish_non_exhaustive()
    }
}

impl CaseStore {
    /// Open (or create) the store at `path`
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the settings table
    /// cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        info!(path = %path.display(), "Opened case store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory store
    ///
    /// # Errors
    /// Returns an error if the settings table cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SETTINGS_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CaseStoreError::Poisoned)
    }

    /// Create the case table for a guild if it does not exist
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub fn ensure_schema(&self, guild_id: GuildId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                case_id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT,
                target_id INTEGER,
                moderator_id INTEGER,
                reason TEXT,
                message_id INTEGER
            );",
            case_table(guild_id)
        ))?;
        debug!(guild_id = %guild_id, "Case table ensured");
        Ok(())
    }

    /// Insert a new case and return its id
    ///
    /// # Errors
    /// Returns [`CaseStoreError::MissingSchema`] if the guild table has not been
    /// provisioned, or a database error.
    pub fn insert(&self, guild_id: GuildId, case: &NewCase) -> StoreResult<u64> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (action, target_id, moderator_id, reason, message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                case_table(guild_id)
            ),
            params![
                case.action,
                case.target_id,
                case.moderator_id,
                case.reason,
                case.message_id
            ],
        )
        .map_err(|e| classify(guild_id, e))?;

        let case_id = u64::try_from(conn.last_insert_rowid()).unwrap_or_default();
        Ok(case_id)
    }

    /// Look up a case by its id
    ///
    /// # Errors
    /// Returns [`CaseStoreError::MissingSchema`] or a database error.
    pub fn find_by_case_id(&self, guild_id: GuildId, case_id: u64) -> StoreResult<Option<CaseRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {CASE_COLUMNS} FROM {} WHERE case_id = ?1",
                case_table(guild_id)
            ),
            params![case_id],
            case_from_row,
        )
        .optional()
        .map_err(|e| classify(guild_id, e))
    }

    /// Most recent case with the given target, moderator and reason
    ///
    /// # Errors
    /// Returns [`CaseStoreError::MissingSchema`] or a database error.
    pub fn find_latest_by(
        &self,
        guild_id: GuildId,
        target_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> StoreResult<Option<CaseRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {CASE_COLUMNS} FROM {}
                 WHERE target_id = ?1 AND moderator_id = ?2 AND reason = ?3
                 ORDER BY case_id DESC LIMIT 1",
                case_table(guild_id)
            ),
            params![target_id, moderator_id, reason],
            case_from_row,
        )
        .optional()
        .map_err(|e| classify(guild_id, e))
    }

    /// Rewrite the action label of a case
    ///
    /// # Errors
    /// Returns [`CaseStoreError::CaseNotFound`] if no such case exists.
    pub fn update_action(&self, guild_id: GuildId, case_id: u64, action: &str) -> StoreResult<()> {
        self.update_column(guild_id, case_id, "action", action)
    }

    /// Replace the reason of a case
    ///
    /// # Errors
    /// Returns [`CaseStoreError::CaseNotFound`] if no such case exists.
    pub fn update_reason(&self, guild_id: GuildId, case_id: u64, reason: &str) -> StoreResult<()> {
        self.update_column(guild_id, case_id, "reason", reason)
    }

    fn update_column(
        &self,
        guild_id: GuildId,
        case_id: u64,
        column: &'static str,
        value: &str,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET {column} = ?1 WHERE case_id = ?2",
                    case_table(guild_id)
                ),
                params![value, case_id],
            )
            .map_err(|e| classify(guild_id, e))?;

        if changed == 0 {
            return Err(CaseStoreError::CaseNotFound { guild_id, case_id });
        }
        Ok(())
    }

    /// The latest `limit` cases of a guild, newest first
    ///
    /// # Errors
    /// Returns [`CaseStoreError::MissingSchema`] or a database error.
    pub fn list_recent(&self, guild_id: GuildId, limit: u32) -> StoreResult<Vec<CaseRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CASE_COLUMNS} FROM {} ORDER BY case_id DESC LIMIT ?1",
                case_table(guild_id)
            ))
            .map_err(|e| classify(guild_id, e))?;

        let records = stmt
            .query_map(params![limit], case_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// The latest `limit` cases against one user, newest first, plus how many
    /// cases that user has in total
    ///
    /// # Errors
    /// Returns [`CaseStoreError::MissingSchema`] or a database error.
    pub fn list_recent_for_target(
        &self,
        guild_id: GuildId,
        target_id: u64,
        limit: u32,
    ) -> StoreResult<(Vec<CaseRecord>, u64)> {
        let conn = self.lock()?;
        let table = case_table(guild_id);

        let total: u64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE target_id = ?1"),
                params![target_id],
                |row| row.get(0),
            )
            .map_err(|e| classify(guild_id, e))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM {table}
             WHERE target_id = ?1 ORDER BY case_id DESC LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(params![target_id, limit], case_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((records, total))
    }

    /// The configured log channel of a guild
    ///
    /// # Errors
    /// Returns a database error.
    pub fn log_channel(&self, guild_id: GuildId) -> StoreResult<Option<ChannelId>> {
        let conn = self.lock()?;
        let channel: Option<Option<u64>> = conn
            .query_row(
                "SELECT channel_id FROM settings WHERE guild_id = ?1",
                params![guild_id.get()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(channel.flatten().filter(|id| *id != 0).map(ChannelId::new))
    }

    /// Set the log channel of a guild
    ///
    /// # Errors
    /// Returns a database error.
    pub fn set_log_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (guild_id, channel_id) VALUES (?1, ?2)
             ON CONFLICT(guild_id) DO UPDATE SET channel_id = excluded.channel_id",
            params![guild_id.get(), channel_id.get()],
        )?;
        Ok(())
    }
}

fn case_table(guild_id: GuildId) -> String {
    format!("\"cases_{}\"", guild_id.get())
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<CaseRecord> {
    Ok(CaseRecord {
        case_id: row.get(0)?,
        action: row.get(1)?,
        target_id: row.get(2)?,
        moderator_id: row.get(3)?,
        reason: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        message_id: row.get(5)?,
    })
}

/// Turn "no such table" into a missing-schema signal
fn classify(guild_id: GuildId, error: rusqlite::Error) -> CaseStoreError {
    match &error {
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.starts_with("no such table") => {
            CaseStoreError::MissingSchema(guild_id)
        }
        _ => CaseStoreError::Database(error),
    }
}
