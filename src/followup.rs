//! Follow-up engine — scans the inbox for tokens of unanswered requests and
//! moves their ledger rows forward.

use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::{LedgerStatus, LedgerStore};
use crate::mail::{InboxMessage, InboxSource};
use crate::matcher::ReplyMatcher;

pub const NOTE_REPLY_FOUND: &str = "Reply found in inbox via token.";
pub const NOTE_NO_REPLY: &str = "No reply detected (token not found in inbox).";

/// Totals of a follow-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowupSummary {
    pub checked: usize,
    pub answered: usize,
    pub rebilled: usize,
    /// Verdicts the store could not record because the token was gone.
    pub missing: usize,
}

/// Runs one follow-up pass over the ledger.
pub struct FollowupEngine<'a> {
    ledger: &'a dyn LedgerStore,
    inbox: &'a mut dyn InboxSource,
    matcher: &'a dyn ReplyMatcher,
    scan_limit: usize,
}

impl<'a> FollowupEngine<'a> {
    pub fn new(
        ledger: &'a dyn LedgerStore,
        inbox: &'a mut dyn InboxSource,
        matcher: &'a dyn ReplyMatcher,
        scan_limit: usize,
    ) -> Self {
        Self {
            ledger,
            inbox,
            matcher,
            scan_limit,
        }
    }

    /// Check every SENT or REBILLED row of `period` (all periods when
    /// `None`). A reply moves the row to RESPONDED, otherwise it is marked
    /// REBILLED again. PREPARED and RESPONDED rows are left alone.
    pub fn run(&mut self, period: Option<&str>) -> Result<FollowupSummary> {
        let rows = self.ledger.rows()?;
        let pending: Vec<_> = rows
            .into_iter()
            .filter(|r| period.is_none_or(|p| r.month_ref.trim() == p))
            .filter(|r| r.status.awaits_reply())
            .collect();

        let mut summary = FollowupSummary::default();
        if pending.is_empty() {
            info!(period = period.unwrap_or("*"), "No rows awaiting a reply");
            return Ok(summary);
        }

        let inbox = self.inbox.newest_first(self.scan_limit)?;
        info!(
            period = period.unwrap_or("*"),
            pending = pending.len(),
            inbox = inbox.len(),
            "Follow-up started"
        );

        for row in &pending {
            let token = row.token.trim();
            if token.is_empty() {
                warn!(client = %row.client_code, "Ledger row has no token, skipping");
                continue;
            }
            summary.checked += 1;

            let (status, note) = if self.replied(token, &inbox) {
                summary.answered += 1;
                info!(token = %token, client = %row.client_code, "RESPONDED");
                (LedgerStatus::Responded, NOTE_REPLY_FOUND)
            } else {
                summary.rebilled += 1;
                warn!(token = %token, client = %row.client_code, "REBILLED (no reply detected)");
                (LedgerStatus::Rebilled, NOTE_NO_REPLY)
            };
            if !self.ledger.update_by_token(token, status, Some(note))? {
                warn!(token = %token, status = %status, "Ledger row vanished before update");
                summary.missing += 1;
            }
        }

        info!(
            checked = summary.checked,
            answered = summary.answered,
            rebilled = summary.rebilled,
            missing = summary.missing,
            "Follow-up summary"
        );
        Ok(summary)
    }

    fn replied(&self, token: &str, inbox: &[InboxMessage]) -> bool {
        inbox.iter().any(|msg| self.matcher.matches(token, msg))
    }
}
