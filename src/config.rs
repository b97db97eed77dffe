//! Configuration types, loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::ledger::workbook::DEFAULT_TABLE;
use crate::mail::MailAccount;
use crate::token::DEFAULT_PREFIX;

/// Whole-run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub history: HistoryConfig,
    pub project: ProjectConfig,
    pub mail: MailConfig,
    pub behavior: BehaviorConfig,
    pub email: EmailConfig,
    pub cc_rules: CcRules,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Audit candidates sheet (JSON rows).
    pub audit: Option<PathBuf>,
    /// Professionals directory sheet (JSON rows).
    pub professionals: Option<PathBuf>,
    /// Ledger workbook.
    pub history: PathBuf,
    pub email_body_html: Option<PathBuf>,
    pub signature_html: Option<PathBuf>,
    pub drafts_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            audit: None,
            professionals: None,
            history: PathBuf::from("history/performance_audit_history.json"),
            email_body_html: None,
            signature_html: None,
            drafts_dir: PathBuf::from("drafts"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub table_name: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Reporting period stamped on new rows and used to scope follow-up.
    /// Empty means "every period" for follow-up.
    pub month_ref: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    /// Login name; falls back to `from_address`.
    pub username: Option<String>,
    /// Environment variable holding the mailbox password.
    pub password_env: String,
    pub inbox_folder: String,
    pub sent_folder: String,
    pub use_sent_folder: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_address: String::new(),
            smtp_host: String::new(),
            smtp_port: 587,
            imap_host: String::new(),
            imap_port: 993,
            username: None,
            password_env: "AUDIT_MAIL_PASSWORD".to_string(),
            inbox_folder: "INBOX".to_string(),
            sent_folder: "Sent".to_string(),
            use_sent_folder: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// `display` previews drafts, `send` transmits.
    pub send_mode: String,
    /// When false, `send` mode still only previews.
    pub force_send: bool,
    pub delay_between_emails_sec: f64,
    pub retry_send: u32,
    pub retry_pause_ms: u64,
    pub max_emails: Option<usize>,
    /// Inbox messages inspected per follow-up run.
    pub scan_limit: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            send_mode: "display".to_string(),
            force_send: true,
            delay_between_emails_sec: 2.5,
            retry_send: 2,
            retry_pause_ms: 1200,
            max_emails: None,
            scan_limit: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub subject_template: String,
    pub sla_business_days: u32,
    pub token_prefix: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject_template: "Auditoria – Cliente {nome_cliente} – {cod_cliente}".to_string(),
            sla_business_days: 3,
            token_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CcRules {
    /// Leader codes for which no copy recipient is added.
    pub skip_cc_if_leader_in_codes: Vec<String>,
}

/// Whether a dispatch run delivers mail or only prepares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Preview,
    Send,
}

impl AppConfig {
    /// Load from a JSON file. A missing file is fatal.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let cfg: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.behavior.send_mode.to_lowercase().as_str() {
            "display" | "send" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "behavior.send_mode".into(),
                    message: format!("expected \"display\" or \"send\", got \"{other}\""),
                });
            }
        }
        if !self.behavior.delay_between_emails_sec.is_finite()
            || self.behavior.delay_between_emails_sec < 0.0
        {
            return Err(ConfigError::InvalidValue {
                key: "behavior.delay_between_emails_sec".into(),
                message: "must be a non-negative number".into(),
            });
        }
        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        if self.behavior.send_mode.eq_ignore_ascii_case("send") && self.behavior.force_send {
            RunMode::Send
        } else {
            RunMode::Preview
        }
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_secs_f64(self.behavior.delay_between_emails_sec)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.behavior.retry_pause_ms)
    }

    /// Follow-up period filter; `None` checks every period.
    pub fn period_filter(&self) -> Option<&str> {
        let period = self.project.month_ref.trim();
        (!period.is_empty()).then_some(period)
    }

    /// Path of a required input sheet.
    pub fn required_path<'a>(
        &self,
        value: &'a Option<PathBuf>,
        key: &str,
    ) -> Result<&'a Path, ConfigError> {
        value.as_deref().ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: "Set it in the config file.".to_string(),
        })
    }

    /// Build the sending account, reading the password from the environment.
    pub fn mail_account(&self) -> Result<MailAccount, ConfigError> {
        let mail = &self.mail;
        for (key, value) in [
            ("mail.from_address", &mail.from_address),
            ("mail.smtp_host", &mail.smtp_host),
            ("mail.imap_host", &mail.imap_host),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: key.to_string(),
                    hint: "The mail account must be fully configured.".to_string(),
                });
            }
        }
        let password = std::env::var(&mail.password_env)
            .map_err(|_| ConfigError::MissingEnvVar(mail.password_env.clone()))?;

        Ok(MailAccount {
            from_address: mail.from_address.clone(),
            username: mail
                .username
                .clone()
                .unwrap_or_else(|| mail.from_address.clone()),
            password: SecretString::from(password),
            smtp_host: mail.smtp_host.clone(),
            smtp_port: mail.smtp_port,
            imap_host: mail.imap_host.clone(),
            imap_port: mail.imap_port,
        })
    }
}
