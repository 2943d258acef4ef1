//! tokentree - gitignore-aware repository scanner with token counts.
//!
//! Usage:
//!   tokentree scan [PATH]      Scan and list files with token counts
//!   tokentree rules [PATH]     Show which rule files shaped the filter
//!   tokentree watch [PATH]     Scan, then stream changes until Ctrl-C
//!   tokentree --help           Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use tokentree_core::{EstimateTokenCounter, FileRecord, IgnoreMode, ScanConfig};
use tokentree_session::{ScanOutcome, ScanSession, WatchEvent};

#[derive(Parser)]
#[command(
    name = "tokentree",
    version,
    about = "Gitignore-aware repository scanner with token counts",
    long_about = "tokentree walks a directory the way your rule files see it and \
                  reports every remaining file with its size and token count.\n\n\
                  Set RUST_LOG (e.g. RUST_LOG=tokentree=debug) for diagnostics."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and list files with token counts
    Scan {
        #[command(flatten)]
        target: Target,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Number of largest files (by tokens) to list; 0 lists all
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Show the rule files behind the resolved filter
    Rules {
        #[command(flatten)]
        target: Target,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Scan, then print change events until interrupted
    Watch {
        #[command(flatten)]
        target: Target,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct Target {
    /// Path to scan (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// How ignore rules are resolved: automatic or global
    #[arg(short, long, default_value = "automatic")]
    mode: IgnoreMode,

    /// Extra ignore pattern for global mode (repeatable)
    #[arg(short = 'i', long = "ignore")]
    ignore: Vec<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip files larger than this (e.g., "512KB", "5MB")
    #[arg(long)]
    max_size: Option<String>,
}

impl Target {
    fn load_config(&self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ScanConfig::default(),
        };
        if let Some(max_size) = &self.max_size {
            config.max_file_size = parse_size(max_size)?;
        }
        Ok(config)
    }

    fn session(&self) -> Result<ScanSession> {
        Ok(ScanSession::new(self.load_config()?, Arc::new(EstimateTokenCounter)))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            target,
            format,
            top,
        } => run_scan(&target, format, top).await?,
        Command::Rules { target, format } => run_rules(&target, format).await?,
        Command::Watch { target, format } => run_watch(&target, format).await?,
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

/// Run a scan and display the result.
async fn run_scan(target: &Target, format: OutputFormat, top_n: usize) -> Result<()> {
    let session = target.session()?.watch_after_scan(false);
    let outcome = scan(&session, target).await?;

    match format {
        OutputFormat::Text => print_outcome(&outcome, top_n),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?),
    }
    Ok(())
}

/// Resolve rules and print where they came from.
async fn run_rules(target: &Target, format: OutputFormat) -> Result<()> {
    let session = target.session()?;
    let rules = session
        .resolve_rules(&target.path, target.mode, &target.ignore)
        .await
        .context("Failed to resolve ignore rules")?;

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(" {} ({} mode)", rules.root.display(), rules.mode);
            println!(" {} active patterns", rules.filter.len());
            println!("{}", "─".repeat(60));

            if rules.origin.is_empty() {
                println!();
                println!(" No rule files contributed.");
            }
            for (dir, lines) in &rules.origin {
                println!();
                println!(" {dir}");
                for line in lines {
                    println!("   {line}");
                }
            }
            if !rules.custom_patterns.is_empty() {
                println!();
                println!(" custom");
                for pattern in &rules.custom_patterns {
                    println!("   {pattern}");
                }
            }
            println!();
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "root": rules.root,
                "mode": rules.mode,
                "patterns": rules.filter.patterns(),
                "origin": rules.origin,
                "custom": rules.custom_patterns,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

/// Scan, then stream watch events until Ctrl-C.
async fn run_watch(target: &Target, format: OutputFormat) -> Result<()> {
    let session = target.session()?;
    let mut events = session.subscribe_changes();

    let outcome = scan(&session, target).await?;
    if !outcome.is_complete() {
        return Err(eyre!("Scan ended early ({}); not watching", outcome.status));
    }
    eprintln!(
        "Watching {} ({} files, {} tokens). Press Ctrl-C to stop.",
        outcome.rules.root.display(),
        outcome.records.len(),
        outcome.total_tokens()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, &outcome.rules.root, format)?,
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("Dropped {skipped} events; rescan for an exact view");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop_watching().await;
    Ok(())
}

async fn scan(session: &ScanSession, target: &Target) -> Result<ScanOutcome> {
    eprintln!("Scanning {}...", target.path.display());
    session
        .scan(&target.path, target.mode, &target.ignore)
        .await
        .with_context(|| format!("Scan of {} failed", target.path.display()))
}

fn print_outcome(outcome: &ScanOutcome, top_n: usize) {
    let skipped = outcome.records.iter().filter(|r| r.is_skipped).count();
    let binary = outcome.records.iter().filter(|r| r.is_binary).count();

    println!();
    println!("{}", "─".repeat(70));
    println!(
        " {} - {} tokens, {}",
        outcome.rules.root.display(),
        outcome.total_tokens(),
        format_size(outcome.total_bytes())
    );
    println!(
        " {} files ({} binary, {} skipped), {} directories",
        outcome.records.len(),
        binary,
        skipped,
        outcome.progress.directories_visited
    );
    println!(
        " {} in {:.2}s",
        outcome.status,
        outcome.duration.as_secs_f64()
    );
    println!("{}", "─".repeat(70));
    println!();

    let mut records = outcome.sorted_records();
    records.sort_by(|a, b| b.token_count.cmp(&a.token_count));
    let shown = if top_n == 0 { records.len() } else { top_n };

    for record in records.iter().take(shown) {
        println!(
            " {:>9} {:>10}  {}{}",
            record.token_count,
            format_size(record.size_bytes),
            truncate(&record.relative_path, 48),
            annotation(record)
        );
    }
    if records.len() > shown {
        println!(" ... {} more", records.len() - shown);
    }
    println!();
}

fn print_event(event: &WatchEvent, root: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => match event {
            WatchEvent::Added(record) => {
                println!("+ {} ({} tokens)", record.relative_path, record.token_count)
            }
            WatchEvent::Updated(record) => {
                println!("~ {} ({} tokens)", record.relative_path, record.token_count)
            }
            WatchEvent::Removed(path) => {
                let shown = path.strip_prefix(root).unwrap_or(path);
                println!("- {}", shown.display());
            }
        },
        OutputFormat::Json => {
            let json = match event {
                WatchEvent::Added(record) => {
                    serde_json::json!({ "type": "added", "record": record.as_ref() })
                }
                WatchEvent::Updated(record) => {
                    serde_json::json!({ "type": "updated", "record": record.as_ref() })
                }
                WatchEvent::Removed(path) => serde_json::json!({ "type": "removed", "path": path }),
            };
            println!("{}", serde_json::to_string(&json)?);
        }
    }
    Ok(())
}

fn outcome_json(outcome: &ScanOutcome) -> serde_json::Value {
    let records: Vec<&FileRecord> = outcome.records.iter().map(|r| r.as_ref()).collect();
    serde_json::json!({
        "root": outcome.rules.root,
        "mode": outcome.rules.mode,
        "status": outcome.status,
        "progress": outcome.progress,
        "duration_ms": outcome.duration.as_millis() as u64,
        "total_tokens": outcome.total_tokens(),
        "records": records,
    })
}

fn annotation(record: &FileRecord) -> String {
    if let Some(error) = &record.error {
        format!("  [skipped: {error}]")
    } else if record.is_binary {
        "  [binary]".to_string()
    } else if record.is_excluded_by_default {
        "  [excluded by default]".to_string()
    } else {
        String::new()
    }
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Parse a size string (e.g., "1KB", "10MB", "1GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: u64 = match unit {
        "GB" | "G" => 1024 * 1024 * 1024,
        "MB" | "M" => 1024 * 1024,
        "KB" | "K" => 1024,
        "B" | "" => 1,
        other => return Err(eyre!("Unknown size unit {other:?}")),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size {s:?}"))?;
    if !num.is_finite() || num < 0.0 {
        return Err(eyre!("Size must be a non-negative number, got {s:?}"));
    }

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("5MB").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert!(parse_size("3 parsecs").is_err());
    }

    #[test]
    fn test_parse_size_rejects_negative_and_infinite() {
        assert!(parse_size("-5MB").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("1e400").is_err());
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a/very/long/path.rs", 8), "a/very/…");
    }

    #[test]
    fn test_cli_parses_mode_and_patterns() {
        let cli = Cli::parse_from(["tokentree", "scan", "repo", "--mode", "global", "-i", "*.md"]);
        let Command::Scan { target, .. } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(target.mode, IgnoreMode::Global);
        assert_eq!(target.ignore, vec!["*.md".to_string()]);
        assert_eq!(target.path, PathBuf::from("repo"));
    }
}
