//! Minimal blocking IMAP client over rustls — enough to read an inbox
//! snapshot and file sent copies.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::{InboxMessage, InboxSource, MailAccount};
use crate::error::TransportError;

/// Messages fetched per `FETCH` command.
const FETCH_BATCH: u32 = 200;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Everything the server sent in reply to one tagged command.
#[derive(Debug, Default)]
struct Reply {
    lines: Vec<String>,
    /// Literal payloads, each paired with the line that announced it.
    literals: Vec<(String, Vec<u8>)>,
}

/// An authenticated IMAP connection.
pub struct ImapSession {
    stream: BufReader<TlsStream>,
    host: String,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, negotiate TLS and log in.
    pub fn connect(account: &MailAccount) -> Result<Self, TransportError> {
        let host = account.imap_host.clone();
        let conn_err = |reason: String| TransportError::Connection {
            host: host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((&*account.imap_host, account.imap_port))
            .map_err(|e| conn_err(e.to_string()))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(|e| conn_err(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(account.imap_host.clone())
            .map_err(|e| conn_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| conn_err(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            host: account.imap_host.clone(),
            tag_counter: 0,
        };

        let _greeting = session.read_line()?;
        session
            .command(&format!(
                "LOGIN {} {}",
                quote(&account.username),
                quote(account.password.expose_secret())
            ))
            .map_err(|e| TransportError::AccountNotFound {
                account: account.username.clone(),
                reason: format!("IMAP login failed: {e}"),
            })?;

        debug!(host = %session.host, "IMAP session opened");
        Ok(session)
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    fn io_err(&self, e: std::io::Error) -> TransportError {
        TransportError::Connection {
            host: self.host.clone(),
            reason: e.to_string(),
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|e| TransportError::Connection {
                host: self.host.clone(),
                reason: e.to_string(),
            })
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| self.io_err(e))?;
        if n == 0 {
            return Err(TransportError::Protocol("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).to_string())
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).map_err(|e| self.io_err(e))?;
        Ok(buf)
    }

    /// Read responses up to and including the tagged completion for `tag`.
    fn read_reply(&mut self, tag: &str) -> Result<Reply, TransportError> {
        let mut reply = Reply::default();
        let done_prefix = format!("{tag} ");
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let payload = self.read_exact(len)?;
                reply.literals.push((line, payload));
                continue;
            }
            if let Some(status) = line.strip_prefix(&done_prefix) {
                if status.starts_with("OK") {
                    return Ok(reply);
                }
                return Err(TransportError::Protocol(line.trim_end().to_string()));
            }
            reply.lines.push(line);
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Reply, TransportError> {
        let tag = self.next_tag();
        self.write_raw(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.read_reply(&tag)
    }

    /// Select `folder`, returning its message count.
    pub fn select(&mut self, folder: &str) -> Result<u32, TransportError> {
        let reply = self.command(&format!("SELECT {}", quote(folder)))?;
        Ok(reply
            .lines
            .iter()
            .find_map(|l| parse_exists(l))
            .unwrap_or(0))
    }

    /// Raw RFC 822 bytes for sequence numbers `first..=last`, highest first.
    /// Uses `BODY.PEEK[]` so the scan leaves `\Seen` flags alone.
    pub fn fetch_range(&mut self, first: u32, last: u32) -> Result<Vec<Vec<u8>>, TransportError> {
        let reply = self.command(&format!("FETCH {first}:{last} (BODY.PEEK[])"))?;
        let mut numbered: Vec<(u32, Vec<u8>)> = reply
            .literals
            .into_iter()
            .map(|(line, bytes)| (parse_fetch_seq(&line).unwrap_or(0), bytes))
            .collect();
        numbered.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(numbered.into_iter().map(|(_, bytes)| bytes).collect())
    }

    /// Store a message in `folder`, flagged as read.
    pub fn append(&mut self, folder: &str, message: &[u8]) -> Result<(), TransportError> {
        let tag = self.next_tag();
        self.write_raw(
            format!(
                "{tag} APPEND {} (\\Seen) {{{}}}\r\n",
                quote(folder),
                message.len()
            )
            .as_bytes(),
        )?;

        let ready = self.read_line()?;
        if !ready.starts_with('+') {
            return Err(TransportError::Protocol(format!(
                "APPEND refused: {}",
                ready.trim_end()
            )));
        }

        self.write_raw(message)?;
        self.write_raw(b"\r\n")?;
        self.read_reply(&tag).map(|_| ())
    }

    pub fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(host = %self.host, "IMAP logout: {e}");
        }
    }
}

/// Inbox reader used by follow-up runs.
pub struct ImapInbox {
    account: MailAccount,
    folder: String,
}

impl ImapInbox {
    pub fn new(account: MailAccount, folder: impl Into<String>) -> Self {
        Self {
            account,
            folder: folder.into(),
        }
    }
}

impl InboxSource for ImapInbox {
    fn newest_first(&mut self, limit: usize) -> Result<Vec<InboxMessage>, TransportError> {
        let mut session = ImapSession::connect(&self.account)?;
        let exists = session.select(&self.folder)?;
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let oldest = exists.saturating_sub(limit) + 1;

        info!(
            folder = %self.folder,
            exists,
            scanning = exists.saturating_sub(oldest - 1),
            "Reading inbox snapshot"
        );

        let parser = MessageParser::default();
        let mut out = Vec::new();
        let mut last = exists;
        while last >= oldest && last > 0 {
            let first = last.saturating_sub(FETCH_BATCH - 1).max(oldest);
            for raw in session.fetch_range(first, last)? {
                match parser.parse(raw.as_slice()) {
                    Some(parsed) => out.push(InboxMessage {
                        subject: parsed.subject().unwrap_or_default().to_string(),
                        body: extract_text(&parsed),
                    }),
                    None => warn!("Skipping unparseable inbox message"),
                }
            }
            last = first - 1;
        }

        session.logout();
        Ok(out)
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote a string as an IMAP quoted string.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Length of a literal announced at the end of `line` (`... {123}\r\n`).
pub fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Message count from a `* N EXISTS` line.
pub fn parse_exists(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("*"), Some(n), Some(kw)) if kw.eq_ignore_ascii_case("EXISTS") => n.parse().ok(),
        _ => None,
    }
}

/// Sequence number from a `* N FETCH ...` line.
pub fn parse_fetch_seq(line: &str) -> Option<u32> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("*"), Some(n), Some(kw)) if kw.eq_ignore_ascii_case("FETCH") => n.parse().ok(),
        _ => None,
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Readable text of a parsed message: plain part, else de-tagged HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}
