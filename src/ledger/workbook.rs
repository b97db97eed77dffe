//! File-backed ledger: a JSON workbook holding named tables.
//!
//! ```json
//! { "tables": { "Performance_Audit_History": { "header": [...], "rows": [[...]] } } }
//! ```
//!
//! Other tables in the same file are carried through untouched.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::model::{HEADER, LedgerRow, LedgerStatus, append_note, timestamp_now};
use super::LedgerStore;
use crate::error::LedgerError;

/// Default table name for audit history.
pub const DEFAULT_TABLE: &str = "Performance_Audit_History";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Workbook {
    #[serde(default)]
    tables: BTreeMap<String, Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    #[serde(default)]
    header: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

impl Table {
    fn with_schema() -> Self {
        Self {
            header: HEADER.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    /// Positions of the `token` and `status` columns, which every read and
    /// update depends on.
    fn key_columns(&self, table: &str) -> Result<(usize, usize), LedgerError> {
        match (self.column("token"), self.column("status")) {
            (Some(t), Some(s)) => Ok((t, s)),
            (t, s) => {
                let mut missing = Vec::new();
                if t.is_none() {
                    missing.push("token".to_string());
                }
                if s.is_none() {
                    missing.push("status".to_string());
                }
                Err(LedgerError::SchemaError {
                    table: table.to_string(),
                    missing,
                })
            }
        }
    }
}

/// Ledger stored as one table inside a JSON workbook file.
#[derive(Debug, Clone)]
pub struct WorkbookLedger {
    path: PathBuf,
    table: String,
}

impl WorkbookLedger {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> LedgerError {
        LedgerError::StoreUnavailable {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Load the workbook; `Ok(None)` when the file does not exist.
    fn load(&self) -> Result<Option<Workbook>, LedgerError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unavailable(e)),
        };
        if content.trim().is_empty() {
            return Ok(Some(Workbook::default()));
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LedgerError::Serialization(format!("{}: {e}", self.path.display())))
    }

    /// Write the whole workbook to a sibling temp file, then rename it over
    /// the ledger so readers never observe a partial write.
    fn save(&self, workbook: &Workbook) -> Result<(), LedgerError> {
        let content = serde_json::to_string_pretty(workbook)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| self.unavailable(e))?;

        let mut temp_file = NamedTempFile::new_in(&parent).map_err(|e| self.unavailable(e))?;
        temp_file
            .write_all(content.as_bytes())
            .and_then(|_| temp_file.flush())
            .map_err(|e| self.unavailable(e))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| self.unavailable(format!("failed to persist temp file: {e}")))?;

        debug!(path = %self.path.display(), table = %self.table, "Ledger saved");
        Ok(())
    }
}

impl LedgerStore for WorkbookLedger {
    fn append(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let mut workbook = self.load()?.unwrap_or_default();
        let table = workbook
            .tables
            .entry(self.table.clone())
            .or_insert_with(Table::with_schema);

        if table.header.is_empty() {
            table.header = Table::with_schema().header;
        } else if table.header.iter().map(String::as_str).ne(HEADER.iter().copied()) {
            // Historical rows keep their layout; the new row follows it.
            warn!(
                table = %self.table,
                header = ?table.header,
                "Ledger header differs from schema, appending under existing header"
            );
        }

        let record = row.to_record(&table.header);
        table.rows.push(record);
        self.save(&workbook)
    }

    fn update_by_token(
        &self,
        token: &str,
        status: LedgerStatus,
        notes: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let mut workbook = self
            .load()?
            .ok_or_else(|| LedgerError::StoreNotFound(self.path.clone()))?;

        let Some(table) = workbook.tables.get_mut(&self.table) else {
            debug!(table = %self.table, "Ledger table absent, nothing to update");
            return Ok(false);
        };

        let (col_token, col_status) = table.key_columns(&self.table)?;
        let col_last = table.column("last_update_at");
        let col_notes = table.column("notes");
        let width = table.header.len();

        let Some(record) = table
            .rows
            .iter_mut()
            .find(|r| r.get(col_token).is_some_and(|t| t.trim() == token))
        else {
            return Ok(false);
        };

        if record.len() < width {
            record.resize(width, String::new());
        }
        record[col_status] = status.to_string();
        if let Some(col) = col_last {
            record[col] = timestamp_now();
        }
        if let (Some(col), Some(note)) = (col_notes, notes.filter(|n| !n.is_empty())) {
            record[col] = append_note(&record[col], note);
        }

        self.save(&workbook)?;
        Ok(true)
    }

    fn rows(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        let workbook = self
            .load()?
            .ok_or_else(|| LedgerError::StoreNotFound(self.path.clone()))?;
        let Some(table) = workbook.tables.get(&self.table) else {
            return Ok(Vec::new());
        };
        table.key_columns(&self.table)?;

        let mut out = Vec::with_capacity(table.rows.len());
        for (i, record) in table.rows.iter().enumerate() {
            match LedgerRow::from_record(&table.header, record) {
                Some(row) => out.push(row),
                None => warn!(row = i + 1, table = %self.table, "Skipping ledger row with unknown status"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::TransportIds;
    use tempfile::TempDir;

    fn row(token: &str, status: LedgerStatus) -> LedgerRow {
        LedgerRow {
            datetime_sent: "2024-06-03 10:00:00".into(),
            month_ref: "2024-06".into(),
            client_code: "1001".into(),
            client_name: "ACME".into(),
            delegate_code: "A12".into(),
            delegate_name: "Ana".into(),
            to_email: "ana@example.com".into(),
            cc_email: String::new(),
            token: token.into(),
            subject: "Audit".into(),
            transport_ids: TransportIds::default(),
            status,
            last_update_at: "2024-06-03 10:00:00".into(),
            notes: String::new(),
        }
    }

    fn test_ledger() -> (WorkbookLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = WorkbookLedger::new(dir.path().join("history.json"), DEFAULT_TABLE);
        (ledger, dir)
    }

    #[test]
    fn append_creates_store_with_header() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ledger.path()).unwrap()).unwrap();
        let header = raw["tables"][DEFAULT_TABLE]["header"].as_array().unwrap();
        assert_eq!(header.len(), 16);
        assert_eq!(header[0], "datetime_sent");
        assert_eq!(ledger.rows().unwrap().len(), 1);
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let ledger = WorkbookLedger::new(dir.path().join("a/b/history.json"), DEFAULT_TABLE);
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        assert!(ledger.path().exists());
    }

    #[test]
    fn appends_are_monotonic() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        let before = ledger.rows().unwrap();

        for token in ["T2", "T3", "T4"] {
            ledger.append(&row(token, LedgerStatus::Prepared)).unwrap();
        }

        let after = ledger.rows().unwrap();
        assert_eq!(after.len(), before.len() + 3);
        assert_eq!(after[0], before[0]);
        let tokens: Vec<&str> = after.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["T1", "T2", "T3", "T4"]);
    }

    #[test]
    fn update_by_token_changes_only_mutable_fields() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        ledger.append(&row("T2", LedgerStatus::Sent)).unwrap();

        let found = ledger
            .update_by_token("T2", LedgerStatus::Responded, Some("reply found"))
            .unwrap();
        assert!(found);

        let rows = ledger.rows().unwrap();
        assert_eq!(rows[0], row("T1", LedgerStatus::Sent));
        let updated = &rows[1];
        assert_eq!(updated.status, LedgerStatus::Responded);
        assert_eq!(updated.notes, "reply found");
        assert_eq!(updated.token, "T2");
        assert_eq!(updated.subject, "Audit");
        assert_eq!(updated.datetime_sent, "2024-06-03 10:00:00");
    }

    #[test]
    fn update_by_token_appends_notes() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        ledger
            .update_by_token("T1", LedgerStatus::Rebilled, Some("first check"))
            .unwrap();
        ledger
            .update_by_token("T1", LedgerStatus::Rebilled, Some("second check"))
            .unwrap();
        ledger.update_by_token("T1", LedgerStatus::Rebilled, None).unwrap();

        let rows = ledger.rows().unwrap();
        assert_eq!(rows[0].notes, "first check | second check");
    }

    #[test]
    fn update_unknown_token_leaves_file_untouched() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        let before = std::fs::read(ledger.path()).unwrap();

        let found = ledger
            .update_by_token("NOPE", LedgerStatus::Responded, Some("x"))
            .unwrap();

        assert!(!found);
        assert_eq!(std::fs::read(ledger.path()).unwrap(), before);
    }

    #[test]
    fn update_missing_store_is_not_found() {
        let (ledger, _dir) = test_ledger();
        let err = ledger
            .update_by_token("T1", LedgerStatus::Responded, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::StoreNotFound(_)));
    }

    #[test]
    fn update_without_required_columns_is_schema_error() {
        let (ledger, _dir) = test_ledger();
        let content = serde_json::json!({
            "tables": { DEFAULT_TABLE: { "header": ["token", "notes"], "rows": [["T1", ""]] } }
        });
        std::fs::write(ledger.path(), content.to_string()).unwrap();

        let err = ledger
            .update_by_token("T1", LedgerStatus::Responded, None)
            .unwrap_err();
        match err {
            LedgerError::SchemaError { missing, .. } => assert_eq!(missing, vec!["status"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rows_without_required_columns_is_schema_error() {
        let (ledger, _dir) = test_ledger();
        let content = serde_json::json!({
            "tables": { DEFAULT_TABLE: { "header": ["token", "month_ref"], "rows": [["T1", "2024-06"]] } }
        });
        std::fs::write(ledger.path(), content.to_string()).unwrap();

        match ledger.rows().unwrap_err() {
            LedgerError::SchemaError { table, missing } => {
                assert_eq!(table, DEFAULT_TABLE);
                assert_eq!(missing, vec!["status"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn foreign_header_is_preserved_on_append() {
        let (ledger, _dir) = test_ledger();
        let content = serde_json::json!({
            "tables": {
                DEFAULT_TABLE: {
                    "header": ["status", "token", "legacy"],
                    "rows": [["ENVIADO", "OLD", "keep me"]]
                },
                "Other": { "header": ["a"], "rows": [["1"]] }
            }
        });
        std::fs::write(ledger.path(), content.to_string()).unwrap();

        ledger.append(&row("NEW", LedgerStatus::Sent)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ledger.path()).unwrap()).unwrap();
        let table = &raw["tables"][DEFAULT_TABLE];
        assert_eq!(table["header"], serde_json::json!(["status", "token", "legacy"]));
        assert_eq!(table["rows"][0], serde_json::json!(["ENVIADO", "OLD", "keep me"]));
        assert_eq!(table["rows"][1], serde_json::json!(["SENT", "NEW", ""]));
        assert_eq!(raw["tables"]["Other"]["rows"][0][0], "1");
    }

    #[test]
    fn absent_table_update_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        WorkbookLedger::new(&path, "Other")
            .append(&row("T1", LedgerStatus::Sent))
            .unwrap();

        let ledger = WorkbookLedger::new(&path, DEFAULT_TABLE);
        assert!(!ledger.update_by_token("T1", LedgerStatus::Responded, None).unwrap());
        assert!(ledger.rows().unwrap().is_empty());
    }

    #[test]
    fn rows_skip_unknown_status() {
        let (ledger, _dir) = test_ledger();
        ledger.append(&row("T1", LedgerStatus::Sent)).unwrap();
        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ledger.path()).unwrap()).unwrap();
        raw["tables"][DEFAULT_TABLE]["rows"][0][13] = serde_json::json!("ARCHIVED");
        std::fs::write(ledger.path(), raw.to_string()).unwrap();

        assert!(ledger.rows().unwrap().is_empty());
    }

    #[test]
    fn unreadable_location_is_unavailable() {
        let dir = TempDir::new().unwrap();
        // A directory where the ledger file should be.
        let path = dir.path().join("history.json");
        std::fs::create_dir(&path).unwrap();
        let ledger = WorkbookLedger::new(&path, DEFAULT_TABLE);

        let err = ledger.append(&row("T1", LedgerStatus::Sent)).unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable { .. }));
    }
}
