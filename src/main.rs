//! Binary entry point for docwatch.
//!
//! Runs the document watcher, or one of its one-shot maintenance commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr/print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docwatch::commands::{App, DEFAULT_LIST_LIMIT};
use docwatch::config::DocwatchConfig;
use docwatch::observability;
use docwatch::{compute_diff, format_diff_for_card};

/// Docwatch - watches hosted documents and reacts to their changes.
#[derive(Parser)]
#[command(name = "docwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "DOCWATCH_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch tracked documents until interrupted.
    Run,

    /// Poll every tracked document once and print the cycle report.
    PollOnce,

    /// Print the change card between two local files.
    Diff {
        /// Previous version.
        old: PathBuf,

        /// Current version.
        new: PathBuf,
    },

    /// Show a document's snapshot history and statistics.
    Snapshots {
        /// Document token.
        token: String,

        /// Maximum number of snapshots to list.
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Apply snapshot retention.
    Prune {
        /// Only prune this document.
        #[arg(short, long)]
        doc: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = if cli.verbose {
        config.logging.clone().verbose()
    } else {
        config.logging.clone()
    };
    // One-shot commands never serve metrics.
    let mut metrics = config.metrics.clone();
    metrics.enabled &= matches!(cli.command, Commands::Run);
    let _observability = match observability::init(&logging, &metrics) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run_command(command: Commands, config: DocwatchConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run => cmd_run(config).await,
        Commands::PollOnce => cmd_poll_once(config).await,
        Commands::Diff { old, new } => cmd_diff(&old, &new),
        Commands::Snapshots { token, limit } => cmd_snapshots(config, &token, limit),
        Commands::Prune { doc } => cmd_prune(config, doc.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DocwatchConfig> {
    let config = match path {
        Some(path) => DocwatchConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => DocwatchConfig::load_default()?,
    };
    Ok(config.with_env_overrides())
}

fn open_app(config: DocwatchConfig) -> anyhow::Result<App> {
    let database = config.database_path();
    App::open(config).with_context(|| format!("opening store at {}", database.display()))
}

async fn cmd_run(config: DocwatchConfig) -> anyhow::Result<()> {
    let app = open_app(config)?;
    let seeded = app.seed()?;
    println!(
        "Watching {} document(s) for {} ({} new, {} rule(s) added); Ctrl-C to stop",
        app.poller().list_tracked().len(),
        app.poller().owner_id(),
        seeded.documents_added,
        seeded.rules_added,
    );

    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C, stopping");
        }
    })
    .await?;
    println!("Stopped");
    Ok(())
}

async fn cmd_poll_once(config: DocwatchConfig) -> anyhow::Result<()> {
    let app = open_app(config)?;
    app.seed()?;
    let report = app.poll_once().await;

    println!(
        "Polled {} document(s) in {}ms: {} changed, {} unchanged, {} debounced, {} failed, {} missing",
        report.polled,
        report.duration_ms,
        report.changed,
        report.unchanged,
        report.debounced,
        report.failed,
        report.missing,
    );
    for event in &report.events {
        println!(
            "  {} {} by {}",
            event.doc_token,
            event.change_type,
            event.new_modified_user.as_deref().unwrap_or("unknown"),
        );
    }
    Ok(())
}

fn cmd_diff(old: &Path, new: &Path) -> anyhow::Result<()> {
    let previous = std::fs::read_to_string(old)
        .with_context(|| format!("reading {}", old.display()))?;
    let current = std::fs::read_to_string(new)
        .with_context(|| format!("reading {}", new.display()))?;

    let diff = compute_diff(&previous, &current, 1, 2);
    println!("{}", format_diff_for_card(&diff));
    Ok(())
}

fn cmd_snapshots(config: DocwatchConfig, token: &str, limit: usize) -> anyhow::Result<()> {
    let app = open_app(config)?;
    let snapshots = app.poller().snapshots();
    let stats = snapshots.get_snapshot_stats(token)?;
    if stats.snapshot_count == 0 {
        println!("No snapshots for {token}");
        return Ok(());
    }

    println!(
        "{token}: {} snapshot(s), {} bytes raw, {} bytes stored, average ratio {:.2}",
        stats.snapshot_count,
        stats.total_content_size,
        stats.total_compressed_size,
        stats.average_compression_ratio,
    );
    for snapshot in snapshots.get_snapshot_history(token, limit)? {
        println!(
            "  r{:<4} {} by {:<16} {:>8} bytes{}",
            snapshot.revision_number,
            format_timestamp(snapshot.stored_at),
            snapshot.modified_by,
            snapshot.content_size,
            if snapshot.is_latest { "  (latest)" } else { "" },
        );
    }
    Ok(())
}

fn cmd_prune(config: DocwatchConfig, doc: Option<&str>) -> anyhow::Result<()> {
    let app = open_app(config)?;
    let removed = app.poller().snapshots().prune_old_snapshots(doc)?;
    match doc {
        Some(doc) => println!("Pruned {removed} snapshot(s) of {doc}"),
        None => println!("Pruned {removed} snapshot(s)"),
    }
    Ok(())
}

fn format_timestamp(at_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(at_ms).map_or_else(
        || at_ms.to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}
