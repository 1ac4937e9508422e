//! mail-triage - Entry point for the scheduled triage run
//!
//! Subcommands:
//!
//! - `mail-triage process` -- triage new mail on one or all accounts.
//! - `mail-triage cleanup-flags` -- remove triage markers so messages are requeued.
//! - `mail-triage show-config` -- print the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use mail_triage::config::{ConfigSource, CONFIG_DIR_ENV};
use mail_triage::domain::MessageUid;
use mail_triage::services::AccountStatus;
use mail_triage::storage::KeychainAccess;
use mail_triage::{AccountSelection, LiveBackends, Orchestrator, ProcessOptions};

/// Multi-account email triage with LLM scoring.
#[derive(Parser)]
#[command(name = "mail-triage", version, about)]
struct Cli {
    /// Configuration directory (defaults to $MAIL_TRIAGE_CONFIG_DIR, then the
    /// platform config directory).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, classify and file new messages.
    Process(ProcessArgs),

    /// Remove failure (and optionally processed) markers.
    CleanupFlags(CleanupArgs),

    /// Print the resolved configuration as YAML.
    ShowConfig {
        /// Account name, or "all".
        #[arg(short, long)]
        account: Option<String>,
    },
}

#[derive(Args)]
struct ProcessArgs {
    /// Account name, or "all".
    #[arg(short, long)]
    account: Option<String>,

    /// Process only this message UID, regardless of markers.
    #[arg(long)]
    uid: Option<u32>,

    /// Ignore processed and failure markers when searching.
    #[arg(long)]
    force_reprocess: bool,

    /// Classify and log without writing notes or setting markers.
    #[arg(long)]
    dry_run: bool,

    /// Override the per-run message cap.
    #[arg(long)]
    max_emails: Option<usize>,
}

#[derive(Args)]
struct CleanupArgs {
    /// Account name, or "all".
    #[arg(short, long)]
    account: Option<String>,

    /// Also remove the processed marker.
    #[arg(long)]
    all: bool,

    /// Count matching messages without changing them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let root = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigSource::default_root().with_context(|| {
            format!("no configuration directory; pass --config-dir or set {CONFIG_DIR_ENV}")
        })?,
    };
    tracing::debug!(config_dir = %root.display(), "using configuration directory");

    let orchestrator = Orchestrator::new(
        ConfigSource::new(root),
        Arc::new(LiveBackends::new(KeychainAccess::new())),
    );

    let completed = match cli.command {
        Commands::Process(args) => {
            let selection = AccountSelection::parse(args.account.as_deref());
            let options = ProcessOptions {
                force_reprocess: args.force_reprocess,
                dry_run: args.dry_run,
                target_uid: args.uid.map(MessageUid),
                max_emails: args.max_emails,
            };
            let summary = orchestrator
                .run(&selection, options)
                .await
                .context("triage run aborted")?;

            for report in &summary.accounts {
                let c = &report.counts;
                tracing::info!(
                    "{:<16} {:<17} fetched={} processed={} important={} spam={} neutral={} recorded={} dropped={} errored={} failed={}",
                    report.account,
                    report.status.label(),
                    c.fetched,
                    c.processed,
                    c.important,
                    c.spam,
                    c.neutral,
                    c.recorded,
                    c.dropped,
                    c.errored,
                    c.failed,
                );
                log_reason(&report.status);
            }
            summary.all_completed()
        }
        Commands::CleanupFlags(args) => {
            let selection = AccountSelection::parse(args.account.as_deref());
            let summary = orchestrator
                .cleanup_flags(&selection, args.all, args.dry_run)
                .await
                .context("marker cleanup aborted")?;

            for report in &summary.accounts {
                tracing::info!(
                    "{:<16} {:<17} matched={} cleared={}",
                    report.account,
                    report.status.label(),
                    report.counts.matched,
                    report.counts.cleared,
                );
                log_reason(&report.status);
            }
            summary.all_completed()
        }
        Commands::ShowConfig { account } => {
            let selection = AccountSelection::parse(account.as_deref());
            let resolved = orchestrator
                .show_config(&selection)
                .context("cannot read configuration")?;

            let mut ok = true;
            for (account, rendered) in resolved {
                match rendered {
                    Ok(yaml) => println!("# account: {account}\n{yaml}"),
                    Err(e) => {
                        ok = false;
                        eprintln!("# account: {account}\n# error: {e}\n");
                    }
                }
            }
            ok
        }
    };

    if !completed {
        std::process::exit(1);
    }
    Ok(())
}

fn log_reason(status: &AccountStatus) {
    match status {
        AccountStatus::Completed => {}
        AccountStatus::ConfigError(reason) | AccountStatus::ConnectionError(reason) => {
            tracing::warn!("  reason: {}", reason);
        }
    }
}
