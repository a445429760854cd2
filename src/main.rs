//! Database Backup/Restore Tool
//!
//! Command line front end for creating, listing, pruning and restoring dumps.

// dbbackup/src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbbackup::backup::{Archive, BackupReport, CatalogStats};
use dbbackup::config::RawJsonConfig;
use dbbackup::restore::logic;
use dbbackup::utils::format_bytes;
use dbbackup::{BackupError, BackupOrchestrator, RetentionConfig};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Parser, Debug)]
#[command(version, about = "Point-in-time database backups with retention and guarded restore")]
struct Cli {
    /// Show debug logs and full error chains.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// JSON config file. Environment variables override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the database into a new archive, then prune expired archives.
    Backup,
    /// Restore an archive over the live database. Without NAME, list archives.
    Restore {
        /// Archive name as shown by `list`.
        name: Option<String>,
    },
    /// List archives, newest first.
    List,
    /// Show aggregate statistics.
    Stats,
    /// Delete archives older than the retention window now.
    Prune,
    /// Delete a single archive.
    Delete {
        name: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_app(&cli).await {
        Ok(code) => code,
        Err(e) => {
            if let Some(BackupError::UserCancelled) = e.downcast_ref::<BackupError>() {
                println!("{} {}", e, BackupError::UserCancelled.hint());
                return ExitCode::SUCCESS;
            }
            for line in failure_report(&e, cli.verbose) {
                eprintln!("{}", line);
            }
            ExitCode::FAILURE
        }
    }
}

/// Error message with its whole cause chain, the operator hint when there is
/// one, and the debug rendering in verbose mode.
fn failure_report(e: &anyhow::Error, verbose: bool) -> Vec<String> {
    let mut lines = vec![format!("❌ Error: {:#}", e)];
    if let Some(backup_err) = e.downcast_ref::<BackupError>() {
        lines.push(format!("💡 Hint: {}", backup_err.hint()));
    }
    if verbose {
        lines.push(format!("{:?}", e));
    }
    lines
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "dbbackup=debug" } else { "dbbackup=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<RetentionConfig> {
    dotenv::dotenv().ok();

    let raw = match &cli.config {
        Some(path) => RawJsonConfig::load_from_json(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.is_file() {
                RawJsonConfig::load_from_json(&default_path)
                    .with_context(|| format!("Failed to load configuration from {}", default_path.display()))?
            } else {
                RawJsonConfig::default()
            }
        }
    };
    Ok(RetentionConfig::from_env(&raw)?)
}

async fn run_app(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli)?;
    let orchestrator = BackupOrchestrator::new(config);

    match &cli.command {
        Command::Backup => {
            println!("🚀 Starting backup of '{}'...", orchestrator.config().database_name());
            let report = orchestrator.create_backup().await?;
            print_backup_report(&report);
            print_stats(&orchestrator.get_stats()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore { name: None } => {
            let archives = orchestrator.list_backups()?;
            if archives.is_empty() {
                println!("No backups found in {}", orchestrator.config().backup_root.display());
                return Ok(ExitCode::FAILURE);
            }
            print_archive_list(&archives);
            println!();
            println!("Run `dbbackup restore <NAME>` to restore one of them.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore { name: Some(name) } => {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            let result = logic::run_interactive(&orchestrator, name, stdin.lock(), &mut stdout)
                .await?
                .into_result()?;
            println!(
                "✅ Restored {} at {}",
                result.name,
                result.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            let archives = orchestrator.list_backups()?;
            if archives.is_empty() {
                println!("No backups found in {}", orchestrator.config().backup_root.display());
            } else {
                print_archive_list(&archives);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            print_stats(&orchestrator.get_stats()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Prune => {
            let days = orchestrator.config().retention_days;
            let summary = orchestrator.enforce_retention()?;
            println!(
                "🧹 Removed {} archive(s) older than {} day(s), reclaimed {}",
                summary.deleted_count,
                days,
                format_bytes(summary.reclaimed_bytes)
            );
            for name in &summary.failed {
                println!("⚠️  Could not delete {}", name);
            }
            Ok(if summary.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Delete { name, yes } => {
            let archive = orchestrator.find_backup(name)?;
            if !yes && !confirm_delete(&archive)? {
                return Err(BackupError::UserCancelled.into());
            }
            let deleted = orchestrator.delete_backup(name)?;
            println!("🗑  Deleted {} ({})", deleted.name, format_bytes(deleted.size_bytes));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Asks the operator to retype the archive name.
fn confirm_delete(archive: &Archive) -> Result<bool> {
    print!("Type the archive name to delete {}: ", archive.name);
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim() == archive.name)
}

fn print_backup_report(report: &BackupReport) {
    let archive = &report.archive;
    println!("✅ Backup completed successfully");
    println!("   Name:      {}", archive.name);
    println!("   Path:      {}", archive.path.display());
    println!("   Size:      {}", format_bytes(archive.size_bytes));
    println!("   Files:     {}", archive.file_count);
    println!("   Duration:  {:.1}s", report.duration.as_secs_f64());
    println!("   Timestamp: {}", report.completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    match &report.retention {
        Some(summary) if summary.deleted_count > 0 => println!(
            "🧹 Retention removed {} expired archive(s), reclaimed {}",
            summary.deleted_count,
            format_bytes(summary.reclaimed_bytes)
        ),
        Some(_) => {}
        None => println!("⚠️  Retention sweep did not complete; see log output"),
    }
}

fn print_stats(stats: &CatalogStats) {
    println!();
    println!("📊 Backup statistics");
    println!("   Archives:  {}", stats.count);
    println!("   Total:     {} in {} file(s)", format_bytes(stats.total_size_bytes), stats.total_file_count);
    println!("   Average:   {}", format_bytes(stats.average_size_bytes));
    let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("   Oldest:    {}", fmt(stats.oldest));
    println!("   Newest:    {}", fmt(stats.newest));
    if !stats.most_recent.is_empty() {
        println!();
        println!("Most recent:");
        print_archive_list(&stats.most_recent);
    }
}

fn print_archive_list(archives: &[Archive]) {
    let width = archives.iter().map(|a| a.name.len()).max().unwrap_or(0);
    println!("{:<width$}  {:<23}  {:>12}  {:>5}", "NAME", "CREATED", "SIZE", "AGE", width = width);
    for archive in archives {
        println!(
            "{:<width$}  {:<23}  {:>12}  {:>4}d",
            archive.name,
            archive.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_bytes(archive.size_bytes),
            archive.age_days,
            width = width
        );
    }
}
