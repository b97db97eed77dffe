//! Recipient directory — who a delegate code reaches, and who leads them.

use std::collections::HashMap;

/// One professional from the directory sheet. Addresses are cleaned but
/// not validated; validity is a dispatch-time decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Normalized delegate code (`A123`).
    pub code: String,
    pub name: String,
    pub email: String,
    /// Normalized code of this delegate's leader, when the sheet has one.
    pub leader_code: Option<String>,
    /// Direct leader address, used when the leader code is unknown.
    pub leader_email: Option<String>,
}

/// Code-keyed lookup of directory records.
pub trait RecipientDirectory {
    fn lookup(&self, code: &str) -> Option<&DirectoryRecord>;
}

/// Directory held in memory, built once per run.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    records: HashMap<String, DirectoryRecord>,
}

impl InMemoryDirectory {
    /// Later records replace earlier ones with the same code.
    pub fn new(records: impl IntoIterator<Item = DirectoryRecord>) -> Self {
        let records = records
            .into_iter()
            .filter(|r| !r.code.is_empty())
            .map(|r| (r.code.clone(), r))
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecipientDirectory for InMemoryDirectory {
    fn lookup(&self, code: &str) -> Option<&DirectoryRecord> {
        self.records.get(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, email: &str) -> DirectoryRecord {
        DirectoryRecord {
            code: code.into(),
            name: format!("Name {code}"),
            email: email.into(),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_codes_keep_last() {
        let dir = InMemoryDirectory::new([
            record("A1", "old@example.com"),
            record("A1", "new@example.com"),
            record("A2", "b@example.com"),
        ]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.lookup("A1").unwrap().email, "new@example.com");
    }

    #[test]
    fn unknown_and_empty_codes() {
        let dir = InMemoryDirectory::new([record("", "x@example.com")]);
        assert!(dir.is_empty());
        assert!(dir.lookup("A9").is_none());
    }
}
