//! SMTP transport via lettre. Drafts and previews are written as `.eml`
//! files; sent copies are filed over IMAP.

use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use uuid::Uuid;

use super::imap::ImapSession;
use super::{Draft, MailAccount, MailTransport, Receipt, TransportIds};
use crate::error::{Ignorable, TransportError};

/// Implicit-TLS submission port; every other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Outbound session bound to one sending account.
pub struct SmtpMailer {
    account: MailAccount,
    from: Mailbox,
    transport: SmtpTransport,
    drafts_dir: PathBuf,
    sent_folder: Option<String>,
    imap: Option<ImapSession>,
}

impl SmtpMailer {
    /// Open the SMTP session and verify the account can authenticate.
    pub fn connect(
        account: MailAccount,
        drafts_dir: impl Into<PathBuf>,
        sent_folder: Option<String>,
    ) -> Result<Self, TransportError> {
        let mailer = Self::build(account, drafts_dir, sent_folder)?;
        mailer.verify()?;
        info!(
            from = %mailer.account.from_address,
            smtp = %mailer.account.smtp_host,
            "SMTP session ready"
        );
        Ok(mailer)
    }

    /// Configure the transport without touching the network.
    pub fn build(
        account: MailAccount,
        drafts_dir: impl Into<PathBuf>,
        sent_folder: Option<String>,
    ) -> Result<Self, TransportError> {
        let from: Mailbox =
            account
                .from_address
                .parse()
                .map_err(|e| TransportError::AccountNotFound {
                    account: account.from_address.clone(),
                    reason: format!("invalid from address: {e}"),
                })?;

        let creds = Credentials::new(
            account.username.clone(),
            account.password.expose_secret().to_string(),
        );
        let builder = if account.smtp_port == SMTPS_PORT {
            SmtpTransport::relay(&account.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&account.smtp_host)
        }
        .map_err(|e| TransportError::Connection {
            host: account.smtp_host.clone(),
            reason: format!("SMTP relay error: {e}"),
        })?;
        let transport = builder
            .port(account.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            account,
            from,
            transport,
            drafts_dir: drafts_dir.into(),
            sent_folder,
            imap: None,
        })
    }

    /// Check that the server accepts a session for this account.
    pub fn verify(&self) -> Result<(), TransportError> {
        match self.transport.test_connection() {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::AccountNotFound {
                account: self.account.from_address.clone(),
                reason: "SMTP server rejected the session".into(),
            }),
            Err(e) => Err(TransportError::AccountNotFound {
                account: self.account.from_address.clone(),
                reason: format!("SMTP connection check failed: {e}"),
            }),
        }
    }

    /// Log out of the IMAP session used for filing sent copies, if one was
    /// opened. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut session) = self.imap.take() {
            session.logout();
            debug!(host = %self.account.imap_host, "IMAP session closed");
        }
    }

    fn build_message(&self, draft: &Draft) -> Result<Message, TransportError> {
        let to: Mailbox = parse_recipient(&draft.to)?;
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(draft.subject.as_str())
            .message_id(Some(draft.message_id.clone()))
            .header(ContentType::TEXT_HTML);
        if let Some(cc) = draft.cc.as_deref() {
            builder = builder.cc(parse_recipient(cc)?);
        }
        builder
            .body(draft.html_body.clone())
            .map_err(|e| TransportError::UnresolvedRecipients(format!("failed to build email: {e}")))
    }

    fn draft_path(&self, draft: &Draft) -> PathBuf {
        let stem: String = draft
            .message_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
            .collect();
        self.drafts_dir.join(format!("{stem}.eml"))
    }

    fn write_draft(&self, draft: &Draft) -> Result<PathBuf, String> {
        let message = self.build_message(draft).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(&self.drafts_dir).map_err(|e| e.to_string())?;
        let path = self.draft_path(draft);
        std::fs::write(&path, message.formatted()).map_err(|e| e.to_string())?;
        Ok(path)
    }

    fn imap_session(&mut self) -> Result<&mut ImapSession, TransportError> {
        if self.imap.is_none() {
            self.imap = Some(ImapSession::connect(&self.account)?);
        }
        self.imap
            .as_mut()
            .ok_or_else(|| TransportError::Protocol("IMAP session unavailable".into()))
    }
}

impl MailTransport for SmtpMailer {
    fn compose(
        &self,
        to: &str,
        cc: Option<&str>,
        subject: &str,
        html_body: &str,
    ) -> Result<Draft, TransportError> {
        let domain = self.from.email.domain().to_string();
        let draft = Draft {
            to: to.to_string(),
            cc: cc.filter(|c| !c.is_empty()).map(str::to_string),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            message_id: format!("<{}@{}>", Uuid::new_v4().simple(), domain),
        };
        self.build_message(&draft)?;
        Ok(draft)
    }

    fn save_draft(&mut self, draft: &Draft) -> Result<(), Ignorable> {
        let path = self.write_draft(draft).map_err(Ignorable)?;
        debug!(path = %path.display(), "Draft saved");
        Ok(())
    }

    fn send(&mut self, draft: &Draft) -> Result<Receipt, TransportError> {
        let message = self.build_message(draft)?;
        let response = self
            .transport
            .send(&message)
            .map_err(|e| TransportError::SendFailed {
                attempts: 1,
                reason: format!("SMTP send failed: {e}"),
            })?;

        let server_reply = format!(
            "{} {}",
            response.code(),
            response.first_line().unwrap_or_default()
        )
        .trim()
        .to_string();
        debug!(to = %draft.to, reply = %server_reply, "Email sent");
        Ok(Receipt { server_reply })
    }

    fn preview(&mut self, draft: &Draft) -> Result<(), TransportError> {
        let path = self.write_draft(draft).map_err(TransportError::Preview)?;
        info!(to = %draft.to, path = %path.display(), "Draft ready for review");
        Ok(())
    }

    fn move_to_sent_folder(&mut self, draft: &Draft) -> Result<(), Ignorable> {
        let folder = self
            .sent_folder
            .clone()
            .ok_or_else(|| Ignorable::new("no sent folder configured"))?;
        let bytes = self
            .build_message(draft)
            .map_err(|e| Ignorable(e.to_string()))?
            .formatted();
        self.imap_session()
            .and_then(|session| session.append(&folder, &bytes))
            .map_err(|e| Ignorable(e.to_string()))
    }

    fn extract_transport_ids(
        &self,
        draft: &Draft,
        receipt: Option<&Receipt>,
    ) -> Result<TransportIds, Ignorable> {
        Ok(TransportIds {
            entry_id: receipt.map(|r| r.server_reply.clone()).unwrap_or_default(),
            conversation_id: String::new(),
            internet_message_id: draft.message_id.clone(),
        })
    }
}

/// Parse a single recipient address.
pub fn parse_recipient(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::UnresolvedRecipients(format!("{address}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tempfile::TempDir;

    fn offline_mailer(drafts: &TempDir) -> SmtpMailer {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let account = MailAccount {
            from_address: "audit@example.com".into(),
            username: "audit@example.com".into(),
            password: SecretString::from("secret".to_string()),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            imap_host: "imap.example.com".into(),
            imap_port: 993,
        };
        SmtpMailer::build(account, drafts.path(), None).unwrap()
    }

    #[test]
    fn parse_recipient_accepts_plain_address() {
        let mb = parse_recipient("ana@example.com").unwrap();
        assert_eq!(mb.email.to_string(), "ana@example.com");
    }

    #[test]
    fn parse_recipient_rejects_garbage() {
        let err = parse_recipient("not an address").unwrap_err();
        assert!(matches!(err, TransportError::UnresolvedRecipients(_)));
    }

    #[test]
    fn compose_uses_sender_domain_for_message_id() {
        let dir = TempDir::new().unwrap();
        let mailer = offline_mailer(&dir);
        let draft = mailer
            .compose("ana@example.com", Some(""), "Auditoria", "<p>Hi</p>")
            .unwrap();
        assert!(draft.message_id.starts_with('<'));
        assert!(draft.message_id.ends_with("@example.com>"));
        assert_eq!(draft.cc, None);
    }

    #[test]
    fn compose_rejects_bad_copy_recipient() {
        let dir = TempDir::new().unwrap();
        let mailer = offline_mailer(&dir);
        let err = mailer
            .compose("ana@example.com", Some("nope"), "Auditoria", "<p>Hi</p>")
            .unwrap_err();
        assert!(matches!(err, TransportError::UnresolvedRecipients(_)));
    }

    #[test]
    fn preview_writes_eml_file() {
        let dir = TempDir::new().unwrap();
        let mut mailer = offline_mailer(&dir);
        let draft = mailer
            .compose("ana@example.com", None, "Auditoria 1001", "<p>Hi</p>")
            .unwrap();
        mailer.preview(&draft).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension().unwrap(), "eml");
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("Subject: Auditoria 1001"));
    }

    #[test]
    fn transport_ids_come_from_receipt_and_draft() {
        let dir = TempDir::new().unwrap();
        let mailer = offline_mailer(&dir);
        let draft = mailer
            .compose("ana@example.com", None, "Auditoria", "<p>Hi</p>")
            .unwrap();
        let receipt = Receipt {
            server_reply: "250 2.0.0 queued".into(),
        };
        let ids = mailer.extract_transport_ids(&draft, Some(&receipt)).unwrap();
        assert_eq!(ids.entry_id, "250 2.0.0 queued");
        assert_eq!(ids.internet_message_id, draft.message_id);
    }

    #[test]
    fn close_without_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut mailer = offline_mailer(&dir);
        mailer.close();
        mailer.close();
        assert!(mailer.imap.is_none());
    }

    #[test]
    fn filing_without_sent_folder_is_ignorable() {
        let dir = TempDir::new().unwrap();
        let mut mailer = offline_mailer(&dir);
        let draft = mailer
            .compose("ana@example.com", None, "Auditoria", "<p>Hi</p>")
            .unwrap();
        assert!(mailer.move_to_sent_folder(&draft).is_err());
        assert!(mailer.imap.is_none());
    }
}
