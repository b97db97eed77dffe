//! Dispatch engine — one tokenized message and one ledger row per eligible
//! audit candidate.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{AppConfig, RunMode};
use crate::directory::{DirectoryRecord, RecipientDirectory};
use crate::error::{Result, TransportError};
use crate::ingest::{AuditCandidate, normalize_delegate_code};
use crate::ledger::model::timestamp_now;
use crate::ledger::{LedgerRow, LedgerStatus, LedgerStore};
use crate::mail::{Draft, MailTransport, Receipt, TransportIds, clean_email, is_valid_email};
use crate::template;
use crate::token;

/// Everything a dispatch run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub mode: RunMode,
    pub month_ref: String,
    pub token_prefix: String,
    pub subject_template: String,
    pub body_template: String,
    pub signature: Option<String>,
    pub sla_business_days: u32,
    /// Normalized leader codes that never receive a copy.
    pub skip_cc_codes: HashSet<String>,
    /// Cap on transmitted messages. Previews do not count and are never
    /// capped; `Some(0)` means no cap.
    pub max_emails: Option<usize>,
    pub delay: Duration,
    pub retry_send: u32,
    pub retry_pause: Duration,
}

impl DispatchSettings {
    pub fn from_config(cfg: &AppConfig, body_template: String, signature: Option<String>) -> Self {
        Self {
            mode: cfg.run_mode(),
            month_ref: cfg.project.month_ref.trim().to_string(),
            token_prefix: cfg.email.token_prefix.clone(),
            subject_template: cfg.email.subject_template.clone(),
            body_template,
            signature,
            sla_business_days: cfg.email.sla_business_days,
            skip_cc_codes: cfg
                .cc_rules
                .skip_cc_if_leader_in_codes
                .iter()
                .map(|c| normalize_delegate_code(c))
                .filter(|c| !c.is_empty())
                .collect(),
            max_emails: cfg.behavior.max_emails,
            delay: cfg.send_delay(),
            retry_send: cfg.behavior.retry_send,
            retry_pause: cfg.retry_pause(),
        }
    }
}

/// Why a candidate produced no ledger row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounters {
    pub no_directory_entry: usize,
    pub bad_email: usize,
    pub unresolved_recipient: usize,
    pub send_cap: usize,
}

impl SkipCounters {
    pub fn total(&self) -> usize {
        self.no_directory_entry + self.bad_email + self.unresolved_recipient + self.send_cap
    }
}

/// Totals of a dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Candidates examined before the run ended or hit the send cap.
    pub processed: usize,
    pub sent: usize,
    pub prepared: usize,
    pub skipped: SkipCounters,
}

/// Pick the copy recipient for a delegate. First matching rule wins:
/// a skip-listed leader gets nothing; a leader known to the directory gets
/// that record's address if valid; otherwise the delegate's direct
/// leader address if valid.
pub fn resolve_copy_recipient(
    delegate: &DirectoryRecord,
    directory: &dyn RecipientDirectory,
    skip_codes: &HashSet<String>,
) -> Option<String> {
    let leader_code = delegate.leader_code.as_deref().filter(|c| !c.is_empty());

    if let Some(code) = leader_code {
        if skip_codes.contains(code) {
            return None;
        }
        if let Some(leader) = directory.lookup(code) {
            let email = clean_email(&leader.email);
            return is_valid_email(&email).then_some(email);
        }
    }

    delegate
        .leader_email
        .as_deref()
        .map(clean_email)
        .filter(|e| is_valid_email(e))
}

/// Runs one dispatch pass over the candidates.
pub struct DispatchEngine<'a> {
    directory: &'a dyn RecipientDirectory,
    transport: &'a mut dyn MailTransport,
    ledger: &'a dyn LedgerStore,
    settings: &'a DispatchSettings,
}

impl<'a> DispatchEngine<'a> {
    pub fn new(
        directory: &'a dyn RecipientDirectory,
        transport: &'a mut dyn MailTransport,
        ledger: &'a dyn LedgerStore,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            directory,
            transport,
            ledger,
            settings,
        }
    }

    /// Process every candidate in order.
    ///
    /// Per-candidate problems are counted and skipped. A send that still
    /// fails after all retries, a failed preview, or an unwritable ledger
    /// aborts the run; rows appended before that point stay in the ledger.
    pub fn run(&mut self, candidates: &[AuditCandidate]) -> Result<DispatchSummary> {
        let directory = self.directory;
        let mut summary = DispatchSummary::default();
        let mut emitted_any = false;

        info!(
            candidates = candidates.len(),
            mode = ?self.settings.mode,
            month_ref = %self.settings.month_ref,
            "Dispatch started"
        );

        let send_cap = self
            .settings
            .max_emails
            .filter(|&max| max > 0 && self.settings.mode == RunMode::Send);

        for (i, candidate) in candidates.iter().enumerate() {
            if let Some(max) = send_cap {
                if summary.sent >= max {
                    summary.skipped.send_cap += candidates.len() - i;
                    warn!(max_emails = max, "Send cap reached, stopping dispatch");
                    break;
                }
            }
            summary.processed += 1;

            let Some(delegate) = directory.lookup(&candidate.delegate_code) else {
                summary.skipped.no_directory_entry += 1;
                warn!(
                    client = %candidate.client_code,
                    delegate = %candidate.delegate_code,
                    "Skipped: delegate not found in directory"
                );
                continue;
            };

            let to_email = clean_email(&delegate.email);
            if !is_valid_email(&to_email) {
                summary.skipped.bad_email += 1;
                warn!(
                    client = %candidate.client_code,
                    delegate = %candidate.delegate_code,
                    "Skipped: delegate has no valid email"
                );
                continue;
            }

            let cc_email =
                resolve_copy_recipient(delegate, directory, &self.settings.skip_cc_codes);
            let token = token::generate(&self.settings.token_prefix);
            let subject = self.subject(candidate);
            let body = self.body(candidate, delegate, &token);

            let draft = match self
                .transport
                .compose(&to_email, cc_email.as_deref(), &subject, &body)
            {
                Ok(draft) => draft,
                Err(TransportError::UnresolvedRecipients(reason)) => {
                    summary.skipped.unresolved_recipient += 1;
                    warn!(client = %candidate.client_code, "Skipped: recipients not resolved: {reason}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if emitted_any && !self.settings.delay.is_zero() {
                std::thread::sleep(self.settings.delay);
            }
            emitted_any = true;

            if let Err(e) = self.transport.save_draft(&draft) {
                debug!(token = %token, "Draft not saved: {e}");
            }

            let (status, receipt) = match self.settings.mode {
                RunMode::Preview => {
                    self.transport.preview(&draft)?;
                    summary.prepared += 1;
                    (LedgerStatus::Prepared, None)
                }
                RunMode::Send => {
                    let receipt = self.send_with_retry(&draft)?;
                    summary.sent += 1;
                    if let Err(e) = self.transport.move_to_sent_folder(&draft) {
                        debug!(token = %token, "Sent copy not filed: {e}");
                    }
                    (LedgerStatus::Sent, Some(receipt))
                }
            };

            let transport_ids = self
                .transport
                .extract_transport_ids(&draft, receipt.as_ref())
                .unwrap_or_else(|e| {
                    debug!(token = %token, "Transport ids unavailable: {e}");
                    TransportIds::default()
                });

            let now = timestamp_now();
            let row = LedgerRow {
                datetime_sent: now.clone(),
                month_ref: self.settings.month_ref.clone(),
                client_code: candidate.client_code.clone(),
                client_name: candidate.client_name.clone(),
                delegate_code: candidate.delegate_code.clone(),
                delegate_name: delegate.name.clone(),
                to_email: to_email.clone(),
                cc_email: cc_email.clone().unwrap_or_default(),
                token: token.clone(),
                subject,
                transport_ids,
                status,
                last_update_at: now,
                notes: String::new(),
            };
            self.ledger.append(&row)?;

            info!(
                status = %status,
                client = %candidate.client_code,
                delegate = %candidate.delegate_code,
                to = %to_email,
                cc = %cc_email.as_deref().unwrap_or("-"),
                token = %token,
                "Request recorded"
            );
        }

        info!(
            processed = summary.processed,
            sent = summary.sent,
            prepared = summary.prepared,
            skipped_no_directory_entry = summary.skipped.no_directory_entry,
            skipped_bad_email = summary.skipped.bad_email,
            skipped_unresolved_recipient = summary.skipped.unresolved_recipient,
            skipped_send_cap = summary.skipped.send_cap,
            "Dispatch summary"
        );
        Ok(summary)
    }

    fn subject(&self, candidate: &AuditCandidate) -> String {
        template::render(
            &self.settings.subject_template,
            &[
                ("nome_cliente", candidate.client_name.as_str()),
                ("cod_cliente", candidate.client_code.as_str()),
            ],
        )
    }

    fn body(&self, candidate: &AuditCandidate, delegate: &DirectoryRecord, token: &str) -> String {
        let sla = self.settings.sla_business_days.to_string();
        let rendered = template::render(
            &self.settings.body_template,
            &[
                ("nome_assessor", delegate.name.as_str()),
                ("nome_cliente", candidate.client_name.as_str()),
                ("cod_cliente", candidate.client_code.as_str()),
                ("sla_business_days", sla.as_str()),
            ],
        );
        template::compose_body(&rendered, token, self.settings.signature.as_deref())
    }

    fn send_with_retry(&mut self, draft: &Draft) -> std::result::Result<Receipt, TransportError> {
        let attempts = self.settings.retry_send.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.transport.send(draft) {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(attempt, attempts, to = %draft.to, "Send attempt failed: {e}");
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(self.settings.retry_pause);
                    }
                }
            }
        }
        Err(TransportError::SendFailed {
            attempts,
            reason: last_error,
        })
    }
}
