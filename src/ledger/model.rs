//! Ledger row model — statuses, the fixed column schema, and row layout.

use chrono::Local;

use crate::mail::TransportIds;

/// Fixed ledger schema, in column order.
pub const HEADER: [&str; 16] = [
    "datetime_sent",
    "month_ref",
    "cod_cliente",
    "nome_cliente",
    "cod_assessor",
    "nome_assessor",
    "to_email",
    "cc_email",
    "token",
    "subject",
    "entry_id",
    "conversation_id",
    "internet_message_id",
    "status",
    "last_update_at",
    "notes",
];

/// Separator placed between successive notes on one row.
pub const NOTES_SEPARATOR: &str = " | ";

/// Lifecycle status of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerStatus {
    /// Message was only previewed; terminal.
    Prepared,
    /// Message was transmitted and awaits a reply.
    Sent,
    /// A reply carrying the token was found; sticky.
    Responded,
    /// No reply was found at the last follow-up.
    Rebilled,
}

impl LedgerStatus {
    /// Whether a follow-up run should look for a reply to this row.
    pub fn awaits_reply(self) -> bool {
        matches!(self, Self::Sent | Self::Rebilled)
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepared => write!(f, "PREPARED"),
            Self::Sent => write!(f, "SENT"),
            Self::Responded => write!(f, "RESPONDED"),
            Self::Rebilled => write!(f, "REBILLED"),
        }
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = String;

    /// Accepts the canonical names and the legacy Portuguese labels,
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PREPARED" | "PREPARADO" => Ok(Self::Prepared),
            "SENT" | "ENVIADO" => Ok(Self::Sent),
            "RESPONDED" | "RESPONDIDO" => Ok(Self::Responded),
            "REBILLED" | "COBRADO" => Ok(Self::Rebilled),
            _ => Err(format!("Unknown ledger status: {}", s)),
        }
    }
}

/// Local wall-clock timestamp in the ledger's text format.
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One dispatch attempt and its follow-up state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub datetime_sent: String,
    /// Reporting period the request belongs to.
    pub month_ref: String,
    pub client_code: String,
    pub client_name: String,
    pub delegate_code: String,
    pub delegate_name: String,
    pub to_email: String,
    pub cc_email: String,
    /// Correlation key; write-once.
    pub token: String,
    pub subject: String,
    pub transport_ids: TransportIds,
    pub status: LedgerStatus,
    pub last_update_at: String,
    pub notes: String,
}

impl LedgerRow {
    /// Value of the named schema column, or `None` for unknown columns.
    pub fn value(&self, column: &str) -> Option<String> {
        let v = match column {
            "datetime_sent" => &self.datetime_sent,
            "month_ref" => &self.month_ref,
            "cod_cliente" => &self.client_code,
            "nome_cliente" => &self.client_name,
            "cod_assessor" => &self.delegate_code,
            "nome_assessor" => &self.delegate_name,
            "to_email" => &self.to_email,
            "cc_email" => &self.cc_email,
            "token" => &self.token,
            "subject" => &self.subject,
            "entry_id" => &self.transport_ids.entry_id,
            "conversation_id" => &self.transport_ids.conversation_id,
            "internet_message_id" => &self.transport_ids.internet_message_id,
            "status" => return Some(self.status.to_string()),
            "last_update_at" => &self.last_update_at,
            "notes" => &self.notes,
            _ => return None,
        };
        Some(v.clone())
    }

    /// Lay the row out under `header`. Header columns outside the schema
    /// are left empty; schema columns absent from `header` are dropped.
    pub fn to_record(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .map(|col| self.value(col).unwrap_or_default())
            .collect()
    }

    /// Rebuild a row from a stored record. Returns `None` when the status
    /// cell does not hold a known status.
    pub fn from_record(header: &[String], record: &[String]) -> Option<Self> {
        let get = |name: &str| -> String {
            header
                .iter()
                .position(|h| h == name)
                .and_then(|i| record.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let status = get("status").parse().ok()?;
        Some(Self {
            datetime_sent: get("datetime_sent"),
            month_ref: get("month_ref"),
            client_code: get("cod_cliente"),
            client_name: get("nome_cliente"),
            delegate_code: get("cod_assessor"),
            delegate_name: get("nome_assessor"),
            to_email: get("to_email"),
            cc_email: get("cc_email"),
            token: get("token"),
            subject: get("subject"),
            transport_ids: TransportIds {
                entry_id: get("entry_id"),
                conversation_id: get("conversation_id"),
                internet_message_id: get("internet_message_id"),
            },
            status,
            last_update_at: get("last_update_at"),
            notes: get("notes"),
        })
    }
}

/// Append `note` to an existing notes cell without discarding prior text.
pub fn append_note(existing: &str, note: &str) -> String {
    if existing.trim().is_empty() {
        note.to_string()
    } else {
        format!("{existing}{NOTES_SEPARATOR}{note}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<String> {
        HEADER.iter().map(|s| s.to_string()).collect()
    }

    fn row() -> LedgerRow {
        LedgerRow {
            datetime_sent: "2024-06-03 10:00:00".into(),
            month_ref: "2024-06".into(),
            client_code: "1001".into(),
            client_name: "ACME".into(),
            delegate_code: "A12".into(),
            delegate_name: "Ana".into(),
            to_email: "ana@example.com".into(),
            cc_email: String::new(),
            token: "PERF-1".into(),
            subject: "Audit".into(),
            transport_ids: TransportIds::default(),
            status: LedgerStatus::Sent,
            last_update_at: "2024-06-03 10:00:00".into(),
            notes: String::new(),
        }
    }

    #[test]
    fn status_parses_legacy_labels() {
        assert_eq!("ENVIADO".parse::<LedgerStatus>(), Ok(LedgerStatus::Sent));
        assert_eq!(" cobrado ".parse::<LedgerStatus>(), Ok(LedgerStatus::Rebilled));
        assert_eq!("RESPONDIDO".parse::<LedgerStatus>(), Ok(LedgerStatus::Responded));
        assert_eq!("preparado".parse::<LedgerStatus>(), Ok(LedgerStatus::Prepared));
        assert!("LOST".parse::<LedgerStatus>().is_err());
    }

    #[test]
    fn status_display_is_canonical() {
        for status in [
            LedgerStatus::Prepared,
            LedgerStatus::Sent,
            LedgerStatus::Responded,
            LedgerStatus::Rebilled,
        ] {
            assert_eq!(status.to_string().parse::<LedgerStatus>(), Ok(status));
        }
    }

    #[test]
    fn only_sent_and_rebilled_await_reply() {
        assert!(LedgerStatus::Sent.awaits_reply());
        assert!(LedgerStatus::Rebilled.awaits_reply());
        assert!(!LedgerStatus::Prepared.awaits_reply());
        assert!(!LedgerStatus::Responded.awaits_reply());
    }

    #[test]
    fn record_follows_schema_order() {
        let record = row().to_record(&header());
        assert_eq!(record.len(), 16);
        assert_eq!(record[8], "PERF-1");
        assert_eq!(record[13], "SENT");
    }

    #[test]
    fn record_respects_foreign_header() {
        let foreign: Vec<String> = ["token", "extra", "status"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(row().to_record(&foreign), vec!["PERF-1", "", "SENT"]);
    }

    #[test]
    fn from_record_rejects_unknown_status() {
        let mut record = row().to_record(&header());
        record[13] = "???".into();
        assert!(LedgerRow::from_record(&header(), &record).is_none());
    }

    #[test]
    fn from_record_reads_back_row() {
        let original = row();
        let record = original.to_record(&header());
        assert_eq!(LedgerRow::from_record(&header(), &record), Some(original));
    }

    #[test]
    fn notes_are_appended() {
        assert_eq!(append_note("", "first"), "first");
        assert_eq!(append_note("first", "second"), "first | second");
    }
}
