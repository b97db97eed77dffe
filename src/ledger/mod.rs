//! Request ledger — the persistent state machine of every dispatched request.
//!
//! Rows are created once per dispatch attempt and never deleted. After
//! creation only `status`, `last_update_at` and `notes` change, and only
//! through [`LedgerStore::update_by_token`].
//!
//! The store is single-writer: each call loads the whole file, mutates it
//! and saves it back, with no cross-process locking. Two runs against one
//! ledger file can lose updates (last writer wins); callers must serialize
//! access. Whole-file rewrites also cap practical ledger size; an
//! append-only log keyed by token is the upgrade path if that ceiling is hit.

pub mod model;
pub mod workbook;

pub use model::{HEADER, LedgerRow, LedgerStatus};
pub use workbook::WorkbookLedger;

use crate::error::LedgerError;

/// Token-keyed persistent ledger.
pub trait LedgerStore {
    /// Add `row` as the new last entry, creating the store if needed.
    fn append(&self, row: &LedgerRow) -> Result<(), LedgerError>;

    /// Move the first row carrying `token` to `status`, stamping the update
    /// time and appending `notes` when given. Returns whether a row matched;
    /// nothing is written when none does.
    fn update_by_token(
        &self,
        token: &str,
        status: LedgerStatus,
        notes: Option<&str>,
    ) -> Result<bool, LedgerError>;

    /// All rows with a recognized status, in stored order.
    fn rows(&self) -> Result<Vec<LedgerRow>, LedgerError>;
}
