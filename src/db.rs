use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            wikitext      TEXT NOT NULL,
            attempts      INTEGER NOT NULL,
            downloaded_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS failures (
            id        TEXT PRIMARY KEY,
            title     TEXT NOT NULL,
            reason    TEXT NOT NULL,
            attempts  INTEGER NOT NULL,
            failed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Downloads ──

/// Store downloaded markup under the title it was finally found at. A
/// success clears any failure recorded by an earlier run.
pub fn save_page(conn: &Connection, id: &str, title: &str, wikitext: &str, attempts: u32) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO pages (id, title, wikitext, attempts) VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![id, title, wikitext, attempts])?;
    conn.prepare_cached("DELETE FROM failures WHERE id = ?1")?
        .execute(params![id])?;
    Ok(())
}

pub fn save_failure(conn: &Connection, id: &str, title: &str, reason: &str, attempts: u32) -> Result<()> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO failures (id, title, reason, attempts) VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![id, title, reason, attempts])?;
    Ok(())
}

pub fn downloaded_ids(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM pages")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

/// `(id, title)` for every stored page, in download order.
pub fn page_titles(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT id, title FROM pages ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Extraction ──

#[derive(Debug, Clone)]
pub struct StoredPage {
    pub id: String,
    pub title: String,
    pub wikitext: String,
}

/// One batch of stored pages in download order.
pub fn fetch_pages(conn: &Connection, offset: usize, limit: usize) -> Result<Vec<StoredPage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, title, wikitext FROM pages ORDER BY rowid LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(params![limit as i64, offset as i64], |row| {
            Ok(StoredPage {
                id: row.get(0)?,
                title: row.get(1)?,
                wikitext: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct FailureRow {
    pub id: String,
    pub title: String,
    pub reason: String,
    pub attempts: u32,
}

pub fn fetch_failures(conn: &Connection) -> Result<Vec<FailureRow>> {
    let mut stmt = conn.prepare("SELECT id, title, reason, attempts FROM failures ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(FailureRow {
                id: row.get(0)?,
                title: row.get(1)?,
                reason: row.get(2)?,
                attempts: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct Stats {
    pub pages: usize,
    pub failures: usize,
    pub retried: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let pages: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let failures: usize = conn.query_row("SELECT COUNT(*) FROM failures", [], |r| r.get(0))?;
    let retried: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE attempts > 1", [], |r| r.get(0))?;
    Ok(Stats {
        pages,
        failures,
        retried,
    })
}
