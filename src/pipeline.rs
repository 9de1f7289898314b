use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants::PART_OF_FIELD;
use crate::db;
use crate::downloader::{self, DownloadWorker, FailedJob, FetchJob, JobOutcome, MarkupFetcher};
use crate::dump::{self, ScanStats};
use crate::hierarchy::{self, Candidates, Hierarchy, TitleIndex};
use crate::wikitext::{self, link_targets, InfoboxFields};

pub const WARS_FILE: &str = "wars.json";
pub const INTERESTING_FILE: &str = "interesting.json";
pub const HIERARCHY_FILE: &str = "hierarchy.json";

const EXTRACT_BATCH: usize = 500;

pub struct ScanReport {
    pub stats: ScanStats,
    pub queued: usize,
    pub downloaded: usize,
    pub failures: Vec<FailedJob>,
}

/// Stream the dump on a blocking thread, queue every interesting entity with
/// an English article, download through the worker pool and save each page
/// as it arrives. Entities already in the store are not fetched again.
pub async fn scan_and_download<F: MarkupFetcher + 'static>(
    settings: &Settings,
    conn: &Connection,
    fetcher: F,
    limit: Option<usize>,
) -> Result<ScanReport> {
    let done = db::downloaded_ids(conn)?;
    let types = settings.conflict_types();
    let mut reader = dump::open(&settings.dump_path)?;
    let progress_every = settings.progress_every;
    info!(
        "Scanning {:?} for {} conflict types ({} pages already stored)",
        settings.dump_path,
        types.len(),
        done.len()
    );

    // Bounded so a slow downloader pauses the dump reader.
    let (job_tx, job_rx) = mpsc::channel::<FetchJob>(settings.queue_capacity.max(1));
    let producer = tokio::task::spawn_blocking(move || -> Result<(ScanStats, usize)> {
        let mut queued = 0usize;
        let stats = dump::scan(&mut reader, &types, progress_every, |item| {
            if limit.is_some_and(|n| queued >= n) {
                return ControlFlow::Break(());
            }
            if done.contains(&item.id) {
                return ControlFlow::Continue(());
            }
            let name = item.english_name().unwrap_or(&item.id);
            let Some(title) = item.english_wikipedia_title() else {
                info!(
                    "No English page for {} ({}: {})",
                    item.id,
                    name,
                    item.english_description().unwrap_or("no description")
                );
                return ControlFlow::Continue(());
            };
            let kind = item
                .instance_of()
                .and_then(|t| types.get(t))
                .map(String::as_str)
                .unwrap_or("?");
            debug!("Queueing {} {:?} ({}) as {:?}", item.id, name, kind, title);

            if job_tx.blocking_send(FetchJob::new(item.id.clone(), title)).is_err() {
                warn!("Download queue closed, stopping scan");
                return ControlFlow::Break(());
            }
            queued += 1;
            ControlFlow::Continue(())
        })?;
        Ok((stats, queued))
    });

    let worker = Arc::new(DownloadWorker::new(fetcher, settings.retry_policy()));
    let concurrency = settings.concurrency.max(1);
    let (result_tx, mut result_rx) = mpsc::channel::<JobOutcome>(concurrency * 2);
    let pool = tokio::spawn(downloader::run_workers(worker, job_rx, concurrency, result_tx));

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} downloaded ({per_sec}) {msg}")?,
    );

    let mut downloaded = 0usize;
    let mut failures = Vec::new();
    while let Some(outcome) = result_rx.recv().await {
        match outcome {
            JobOutcome::Downloaded(page) => {
                if page.requested != page.title {
                    debug!("Saving {} under {:?} (requested {:?})", page.id, page.title, page.requested);
                }
                db::save_page(conn, &page.id, &page.title, &page.wikitext, page.attempts)?;
                downloaded += 1;
                pb.inc(1);
            }
            JobOutcome::Failed(failed) => {
                db::save_failure(conn, &failed.id, &failed.title, &failed.reason.to_string(), failed.attempts)?;
                pb.set_message(format!("{} failed", failures.len() + 1));
                failures.push(failed);
            }
        }
    }
    pb.finish_and_clear();

    let (stats, queued) = producer.await.context("Dump reader task failed")??;
    pool.await.context("Download pool failed")?;

    let titles = db::page_titles(conn)?;
    let wars: Map<String, Value> = titles
        .into_iter()
        .map(|(id, title)| (id, Value::String(title)))
        .collect();
    write_json(&settings.artifact(WARS_FILE), &wars)?;

    info!(
        "Queued {} pages: {} downloaded, {} failed",
        queued,
        downloaded,
        failures.len()
    );
    Ok(ScanReport {
        stats,
        queued,
        downloaded,
        failures,
    })
}

pub struct ExtractCounts {
    pub pages: usize,
    pub interesting: usize,
}

/// Find the infoboxes of every stored page and keep those naming one of the
/// configured participants among the combatants.
pub fn extract(settings: &Settings, conn: &Connection) -> Result<ExtractCounts> {
    let total = db::get_stats(conn)?.pages;
    let filter = settings.infobox_filter();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut interesting = Map::new();
    let mut pages = 0;
    loop {
        let chunk = db::fetch_pages(conn, pages, EXTRACT_BATCH)?;
        if chunk.is_empty() {
            break;
        }
        let found: Vec<_> = chunk
            .par_iter()
            .filter_map(|page| wikitext::process_page(page, &filter))
            .collect();

        for article in found {
            info!("Found combatant in {}, {}", article.id, article.title);
            interesting.insert(article.id, serde_json::to_value(&article.fields)?);
        }
        pages += chunk.len();
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    let counts = ExtractCounts {
        pages,
        interesting: interesting.len(),
    };
    write_json(&settings.artifact(INTERESTING_FILE), &interesting)?;
    Ok(counts)
}

/// Parent for every interesting page, from the links in its `partof` field.
pub fn organise(settings: &Settings, conn: &Connection) -> Result<Hierarchy> {
    let titles = db::page_titles(conn)?;
    let index = TitleIndex::new(titles.iter().map(|(id, title)| (id.as_str(), title.as_str())));

    let path = settings.artifact(INTERESTING_FILE);
    let file = File::open(&path).with_context(|| format!("Failed to open {:?}, run extract first", path))?;
    let interesting: Map<String, Value> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))?;
    info!("Loaded {} infoboxes", interesting.len());

    let records = interesting
        .into_iter()
        .map(|(id, value)| -> Result<Candidates> {
            let fields: InfoboxFields = serde_json::from_value(value)?;
            let titles = fields.get(PART_OF_FIELD).map(|v| link_targets(v)).unwrap_or_default();
            Ok(Candidates { id, titles })
        })
        .collect::<Result<Vec<_>>>()?;

    let hierarchy = hierarchy::resolve(records, &index)?;
    write_json(&settings.artifact(HIERARCHY_FILE), &hierarchy)?;
    Ok(hierarchy)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("Wrote {:?}", path);
    Ok(())
}
