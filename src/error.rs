//! Error types for the audit mailer.

use std::path::PathBuf;

/// Top-level error type. Every variant aborts the current run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger store errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger not found: {0}")]
    StoreNotFound(PathBuf),

    #[error("Ledger {path} unavailable: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("Table {table} is missing required columns: {missing:?}")]
    SchemaError { table: String, missing: Vec<String> },

    #[error("Ledger serialization error: {0}")]
    Serialization(String),
}

/// Mail transport and inbox errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Account {account} not usable: {reason}")]
    AccountNotFound { account: String, reason: String },

    #[error("Recipients could not be resolved: {0}")]
    UnresolvedRecipients(String),

    #[error("Send failed after {attempts} attempts: {reason}")]
    SendFailed { attempts: u32, reason: String },

    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Preview failed: {0}")]
    Preview(String),
}

/// Input sheet ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Required columns not found in {sheet}: {resolved}")]
    MissingColumns { sheet: String, resolved: String },
}

/// Failure of a best-effort operation.
///
/// Callers are expected to log and discard it; it never affects the
/// correctness of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Ignorable(pub String);

impl Ignorable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Result type alias for the audit mailer.
pub type Result<T> = std::result::Result<T, Error>;
