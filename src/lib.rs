//! Performance-audit mailer — token-correlated audit requests and reply
//! follow-up over a persistent ledger.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod followup;
pub mod ingest;
pub mod ledger;
pub mod mail;
pub mod matcher;
pub mod template;
pub mod token;

pub use error::{Error, Result};
