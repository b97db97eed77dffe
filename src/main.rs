use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use perf_audit_mail::config::AppConfig;
use perf_audit_mail::directory::InMemoryDirectory;
use perf_audit_mail::dispatch::{DispatchEngine, DispatchSettings};
use perf_audit_mail::followup::FollowupEngine;
use perf_audit_mail::ingest::{self, Sheet};
use perf_audit_mail::ledger::WorkbookLedger;
use perf_audit_mail::mail::{ImapInbox, SmtpMailer};
use perf_audit_mail::matcher::TokenSubstringMatcher;
use perf_audit_mail::template;

#[derive(Parser)]
#[command(name = "perf-audit-mail")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send performance-audit requests and track replies by token", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = "config.example.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Send (or preview) one audit request per candidate and record it
    Dispatch,

    /// Scan the inbox for replies and update request status
    Followup,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let _guard = init_logging(&cfg.paths.log_dir)?;

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let run_id = Uuid::new_v4();
    let command = match cli.command {
        Commands::Dispatch => "dispatch",
        Commands::Followup => "followup",
    };
    let span = tracing::info_span!("run", id = %run_id, command);
    let _enter = span.enter();
    info!(config = %cli.config.display(), "perf-audit-mail v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Dispatch => run_dispatch(&cfg),
        Commands::Followup => run_followup(&cfg),
    };
    if let Err(e) = &result {
        error!("Run aborted: {e:#}");
    }
    result
}

/// Console output plus a per-run log file in `log_dir`.
fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let file_name = format!("run_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

fn run_dispatch(cfg: &AppConfig) -> anyhow::Result<()> {
    let audit = Sheet::load(cfg.required_path(&cfg.paths.audit, "paths.audit")?)?;
    let professionals =
        Sheet::load(cfg.required_path(&cfg.paths.professionals, "paths.professionals")?)?;

    let candidates = ingest::audit_candidates(&audit)?;
    let directory = InMemoryDirectory::new(ingest::directory_records(&professionals)?);
    info!(
        candidates = candidates.len(),
        directory = directory.len(),
        "Inputs loaded"
    );
    if candidates.is_empty() {
        warn!("No valid audit rows after cleanup");
        return Ok(());
    }

    let body = template::load_html(cfg.paths.email_body_html.as_deref());
    let signature = cfg
        .paths
        .signature_html
        .as_deref()
        .map(|p| template::load_html(Some(p)))
        .filter(|s| !s.trim().is_empty());
    let settings = DispatchSettings::from_config(cfg, body, signature);

    let sent_folder = cfg
        .mail
        .use_sent_folder
        .then(|| cfg.mail.sent_folder.clone());
    let mut mailer = SmtpMailer::connect(
        cfg.mail_account()?,
        cfg.paths.drafts_dir.clone(),
        sent_folder,
    )?;
    let ledger = WorkbookLedger::new(cfg.paths.history.clone(), cfg.history.table_name.clone());

    let result = DispatchEngine::new(&directory, &mut mailer, &ledger, &settings).run(&candidates);
    mailer.close();
    let summary = result?;
    info!(
        total_skipped = summary.skipped.total(),
        ledger = %ledger.path().display(),
        "Dispatch finished"
    );
    Ok(())
}

fn run_followup(cfg: &AppConfig) -> anyhow::Result<()> {
    let ledger = WorkbookLedger::new(cfg.paths.history.clone(), cfg.history.table_name.clone());
    let mut inbox = ImapInbox::new(cfg.mail_account()?, cfg.mail.inbox_folder.clone());

    FollowupEngine::new(
        &ledger,
        &mut inbox,
        &TokenSubstringMatcher,
        cfg.behavior.scan_limit,
    )
    .run(cfg.period_filter())?;
    Ok(())
}
