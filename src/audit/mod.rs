//! Audit reconciliation and case records
//!
//! Turns lagging audit log entries into numbered moderation cases and keeps
//! their channel notifications in step with the stored records.

pub mod entry;
pub mod error;
pub mod notice;
pub mod notifier;
pub mod reconciler;
pub mod record;
pub mod snapshot;
pub mod source;
pub mod store;

pub use entry::{AuditAction, AuditEntry, Identity, NO_REASON, SOFTBAN_LABEL};
pub use error::{AuditError, AuditResult, CaseStoreError, StoreResult};
pub use notice::CaseNotice;
pub use notifier::{Notifier, PostedMessage, SerenityNotifier};
pub use reconciler::{EntryOutcome, ReconcileOutcome, ReconcileSettings, Reconciler};
pub use record::{CaseAmendment, CaseRecord, NewCase};
pub use snapshot::{GuildSnapshot, SnapshotCache};
pub use source::{AuditSource, SerenityAuditSource};
pub use store::CaseStore;
