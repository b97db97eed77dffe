//! Mail I/O — outbound transport and inbound inbox access.
//!
//! The engines only see the [`MailTransport`] and [`InboxSource`] traits.
//! Production implementations are SMTP via lettre ([`smtp::SmtpMailer`]) and
//! raw IMAP over TLS ([`imap::ImapInbox`]).

pub mod address;
pub mod imap;
pub mod smtp;

pub use address::{clean_email, is_valid_email};
pub use imap::ImapInbox;
pub use smtp::SmtpMailer;

use secrecy::SecretString;

use crate::error::{Ignorable, TransportError};

/// Credentials and endpoints of the sending mailbox.
#[derive(Debug, Clone)]
pub struct MailAccount {
    pub from_address: String,
    pub username: String,
    pub password: SecretString,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
}

/// A composed message that has not been delivered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub to: String,
    pub cc: Option<String>,
    pub subject: String,
    pub html_body: String,
    /// RFC 5322 Message-ID assigned at compose time.
    pub message_id: String,
}

/// What the transport reported for a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    pub server_reply: String,
}

/// Provider identifiers captured after a send. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportIds {
    pub entry_id: String,
    pub conversation_id: String,
    pub internet_message_id: String,
}

/// The parts of an inbox message a reply search looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxMessage {
    pub subject: String,
    pub body: String,
}

impl InboxMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Outbound mail session, opened once per run.
pub trait MailTransport {
    /// Build a draft. Fails with [`TransportError::UnresolvedRecipients`]
    /// when an address cannot be resolved.
    fn compose(
        &self,
        to: &str,
        cc: Option<&str>,
        subject: &str,
        html_body: &str,
    ) -> Result<Draft, TransportError>;

    /// Keep a copy of the draft before it is previewed or sent.
    fn save_draft(&mut self, draft: &Draft) -> Result<(), Ignorable>;

    /// Deliver the draft. One attempt; callers own the retry policy.
    fn send(&mut self, draft: &Draft) -> Result<Receipt, TransportError>;

    /// Make the draft available for human review without delivering it.
    fn preview(&mut self, draft: &Draft) -> Result<(), TransportError>;

    /// File a delivered message in the sent folder.
    fn move_to_sent_folder(&mut self, draft: &Draft) -> Result<(), Ignorable>;

    /// Identifiers for the ledger row.
    fn extract_transport_ids(
        &self,
        draft: &Draft,
        receipt: Option<&Receipt>,
    ) -> Result<TransportIds, Ignorable>;
}

/// Inbox snapshot access for reply detection.
pub trait InboxSource {
    /// At most `limit` messages, newest first.
    fn newest_first(&mut self, limit: usize) -> Result<Vec<InboxMessage>, TransportError>;
}
