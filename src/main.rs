mod config;
mod constants;
mod db;
mod downloader;
mod dump;
mod hierarchy;
mod pipeline;
mod wikipedia;
mod wikitext;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::config::Settings;
use crate::wikipedia::WikipediaClient;

#[derive(Parser)]
#[command(name = "war_timelines", about = "Wikidata conflicts to an English Wikipedia war hierarchy")]
struct Cli {
    /// Settings file (default: war_timelines.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the Wikidata dump and download matching articles
    Scan {
        /// Max articles to queue (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Find infoboxes with interesting combatants
    Extract,
    /// Resolve each conflict's parent from its infobox
    Organise,
    /// Scan + extract + organise
    Run {
        /// Max articles to queue
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show download statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    tracing::debug!(?settings, "Loaded settings");

    let result = match cli.command {
        Commands::Scan { limit } => {
            let conn = open_store(&settings)?;
            scan(&settings, &conn, limit).await
        }
        Commands::Extract => {
            let conn = open_store(&settings)?;
            extract(&settings, &conn)
        }
        Commands::Organise => {
            let conn = open_store(&settings)?;
            organise(&settings, &conn)
        }
        Commands::Run { limit } => {
            let conn = open_store(&settings)?;

            let t_scan = Instant::now();
            scan(&settings, &conn, limit).await?;
            println!("Scanned in {}", format_duration(t_scan.elapsed()));

            let t_extract = Instant::now();
            extract(&settings, &conn)?;
            println!("Extracted in {}", format_duration(t_extract.elapsed()));

            organise(&settings, &conn)
        }
        Commands::Stats => {
            let conn = open_store(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Downloaded: {}", s.pages);
            println!("Retried:    {}", s.retried);
            println!("Failed:     {}", s.failures);
            for f in db::fetch_failures(&conn)? {
                println!("  {} {:?}: {} ({} attempts)", f.id, f.title, f.reason, f.attempts);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

async fn scan(settings: &Settings, conn: &Connection, limit: Option<usize>) -> anyhow::Result<()> {
    let client = WikipediaClient::new(&settings.endpoint, &settings.user_agent, settings.request_timeout())?;
    println!(
        "Scanning {:?} ({} workers, up to {} attempts per page)...",
        settings.dump_path,
        settings.concurrency.max(1),
        settings.max_attempts
    );
    let report = pipeline::scan_and_download(settings, conn, client, limit).await?;
    println!(
        "Parsed {} entities ({} skipped, {} conflicts). Queued {}: {} downloaded, {} failed.",
        report.stats.parsed,
        report.stats.skipped,
        report.stats.matched,
        report.queued,
        report.downloaded,
        report.failures.len()
    );
    if !report.failures.is_empty() {
        println!("\n--- Failed ---");
        for f in &report.failures {
            println!("  {} {:?}: {} ({} attempts)", f.id, f.title, f.reason, f.attempts);
        }
    }
    Ok(())
}

fn extract(settings: &Settings, conn: &Connection) -> anyhow::Result<()> {
    let counts = pipeline::extract(settings, conn)?;
    println!(
        "Found {} interesting articles in {} pages.",
        counts.interesting, counts.pages
    );
    Ok(())
}

fn organise(settings: &Settings, conn: &Connection) -> anyhow::Result<()> {
    let tree = pipeline::organise(settings, conn)?;
    if tree.is_empty() {
        println!("No interesting articles to place.");
        return Ok(());
    }
    let roots = tree
        .iter()
        .filter(|(_, parent)| matches!(parent, hierarchy::Parent::Root))
        .count();
    println!(
        "Placed {} articles ({} at the root).",
        tree.len(),
        roots
    );
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, total / 60 % 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}
