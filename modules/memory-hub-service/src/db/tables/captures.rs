//! Watcher capture tables (screens, browser_history, git_activity, watcher_status)
//!
//! Each capture row is written together with its FTS companion row. The oracle
//! probes these indexes alongside the memory index.

use chrono::{Datelike, SecondsFormat};
use memory_hub_types::{
    BrowserVisit, CaptureCounts, CaptureRequest, EvidenceItem, GitCommit, Metadata, OracleSource,
    PatternReport, RepoActivity, ScreenCapture, WatcherReport, WatcherStatus,
};
use rusqlite::{params, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;

use super::super::{now_timestamp, sql_limit, Db};
use crate::error::{HubError, HubResult};
use crate::ranking::{lookback_cutoff, parse_timestamp};

/// Sorts before every stored timestamp.
const EARLIEST_TIMESTAMP: &str = "0001-01-01T00:00:00.000000Z";

impl Db {
    /// Store one capture and bump its watcher's counters. Returns the row id.
    pub fn insert_capture(&self, capture: &CaptureRequest) -> HubResult<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let (watcher, id) = match capture {
            CaptureRequest::Screen(screen) => ("screen", insert_screen(&tx, screen)?),
            CaptureRequest::Browser(visit) => ("browser", insert_browser_visit(&tx, visit)?),
            CaptureRequest::Git(commit) => ("git", insert_git_commit(&tx, commit)?),
        };
        record_watcher_capture(&tx, watcher)?;
        tx.commit()?;

        log::debug!("[CACHE] Captured {} row #{}", watcher, id);
        Ok(id)
    }

    pub fn watcher_report(&self) -> HubResult<WatcherReport> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT watcher_name, status, last_run, last_success, items_captured, last_error
             FROM watcher_status ORDER BY watcher_name",
        )?;
        let watchers = stmt
            .query_map([], |row| {
                Ok(WatcherStatus {
                    watcher_name: row.get(0)?,
                    status: row.get(1)?,
                    last_run: row.get(2)?,
                    last_success: row.get(3)?,
                    items_captured: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let count = |table: &str| -> i64 {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap_or(0)
        };
        let counts = CaptureCounts {
            screen_captures: count("screens"),
            browser_entries: count("browser_history"),
            git_commits: count("git_activity"),
            memories: count("memories"),
        };

        Ok(WatcherReport {
            watchers,
            counts,
            database_path: self.path().to_string(),
        })
    }

    /// Aggregate capture activity over the trailing `days_back` days.
    /// A section whose query fails comes back empty.
    pub fn analyze_patterns(&self, days_back: u32) -> PatternReport {
        let cutoff = lookback_cutoff(days_back)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_else(|| EARLIEST_TIMESTAMP.to_string());
        let conn = self.conn();

        let counts = |sql: &str| -> BTreeMap<String, i64> {
            let result = conn.prepare(sql).and_then(|mut stmt| {
                stmt.query_map([&cutoff], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?
                    .collect::<Result<BTreeMap<_, _>, _>>()
            });
            result.unwrap_or_else(|e| {
                log::warn!("[CACHE] Pattern query failed: {}", e);
                BTreeMap::new()
            })
        };

        let active_hours = counts(
            "SELECT strftime('%H', timestamp) AS hour, COUNT(*) FROM screens
             WHERE timestamp > ?1 AND strftime('%H', timestamp) IS NOT NULL GROUP BY hour",
        );
        let top_apps = counts(
            "SELECT app_name, COUNT(*) AS n FROM screens
             WHERE timestamp > ?1 AND app_name IS NOT NULL
             GROUP BY app_name ORDER BY n DESC LIMIT 10",
        );
        let top_domains = counts(
            "SELECT domain, COUNT(*) AS n FROM browser_history
             WHERE visit_time > ?1 AND domain IS NOT NULL
             GROUP BY domain ORDER BY n DESC LIMIT 10",
        );
        let memory_categories = counts(
            "SELECT category, COUNT(*) FROM memories
             WHERE created_at > ?1 AND category IS NOT NULL GROUP BY category",
        );

        let git_activity = conn
            .prepare(
                "SELECT repo, COUNT(*), COALESCE(SUM(insertions), 0), COALESCE(SUM(deletions), 0)
                 FROM git_activity WHERE timestamp > ?1 GROUP BY repo",
            )
            .and_then(|mut stmt| {
                stmt.query_map([&cutoff], |row| {
                    let repo: String = row.get(0)?;
                    Ok((
                        repo,
                        RepoActivity {
                            commits: row.get(1)?,
                            insertions: row.get(2)?,
                            deletions: row.get(3)?,
                        },
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()
            })
            .map(|rows| {
                let mut by_name: BTreeMap<String, RepoActivity> = BTreeMap::new();
                for (repo, activity) in rows {
                    let entry = by_name.entry(repo_name(&repo).to_string()).or_default();
                    entry.commits += activity.commits;
                    entry.insertions += activity.insertions;
                    entry.deletions += activity.deletions;
                }
                by_name
            })
            .unwrap_or_else(|e| {
                log::warn!("[CACHE] Git pattern query failed: {}", e);
                BTreeMap::new()
            });

        PatternReport {
            days_analyzed: days_back,
            active_hours,
            top_apps,
            top_domains,
            git_activity,
            memory_categories,
            generated_at: now_timestamp(),
        }
    }

    /// Full-text probe of one local index. `match_expr` is passed to MATCH as-is.
    pub fn probe_index(
        &self,
        index: OracleSource,
        match_expr: &str,
        limit: usize,
    ) -> HubResult<Vec<EvidenceItem>> {
        let conn = self.conn();
        let limit = sql_limit(limit);
        let items = match index {
            OracleSource::Screens => {
                let mut stmt = conn.prepare(
                    "SELECT s.ocr_text, s.app_name, s.window_title, s.timestamp
                     FROM screens_fts JOIN screens s ON s.id = screens_fts.rowid
                     WHERE screens_fts MATCH ?1 ORDER BY screens_fts.rank LIMIT ?2",
                )?;
                stmt.query_map(params![match_expr, limit], |row| {
                    let mut metadata = Metadata::new();
                    metadata.insert("app".into(), opt_value(row.get(1)?));
                    metadata.insert("window".into(), opt_value(row.get(2)?));
                    metadata.insert("timestamp".into(), Value::from(row.get::<_, String>(3)?));
                    Ok(EvidenceItem {
                        source: "screen".to_string(),
                        content: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        metadata,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
            OracleSource::Browser => {
                let mut stmt = conn.prepare(
                    "SELECT b.title, b.url, b.domain, b.browser, b.visit_time
                     FROM browser_fts JOIN browser_history b ON b.id = browser_fts.rowid
                     WHERE browser_fts MATCH ?1 ORDER BY browser_fts.rank LIMIT ?2",
                )?;
                stmt.query_map(params![match_expr, limit], |row| {
                    let title: Option<String> = row.get(0)?;
                    let url: String = row.get(1)?;
                    let mut metadata = Metadata::new();
                    metadata.insert("domain".into(), opt_value(row.get(2)?));
                    metadata.insert("browser".into(), opt_value(row.get(3)?));
                    metadata.insert("visit_time".into(), Value::from(row.get::<_, String>(4)?));
                    Ok(EvidenceItem {
                        source: "browser".to_string(),
                        content: format!("{} - {}", title.unwrap_or_default(), url),
                        metadata,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
            OracleSource::Git => {
                let mut stmt = conn.prepare(
                    "SELECT g.message, g.sha, g.repo, g.branch, g.files_changed, g.timestamp
                     FROM git_fts JOIN git_activity g ON g.id = git_fts.rowid
                     WHERE git_fts MATCH ?1 ORDER BY git_fts.rank LIMIT ?2",
                )?;
                stmt.query_map(params![match_expr, limit], |row| {
                    let message: String = row.get(0)?;
                    let sha: String = row.get(1)?;
                    let mut metadata = Metadata::new();
                    metadata.insert("repo".into(), Value::from(row.get::<_, String>(2)?));
                    metadata.insert("branch".into(), opt_value(row.get(3)?));
                    metadata.insert("files".into(), opt_value(row.get(4)?));
                    metadata.insert("timestamp".into(), Value::from(row.get::<_, String>(5)?));
                    Ok(EvidenceItem {
                        source: "git".to_string(),
                        content: format!("{} ({})", message, sha.chars().take(8).collect::<String>()),
                        metadata,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
            OracleSource::Memories => {
                let mut stmt = conn.prepare(
                    "SELECT m.content, m.source, m.category, m.created_at
                     FROM memories_fts JOIN memories m ON m.id = memories_fts.rowid
                     WHERE memories_fts MATCH ?1 ORDER BY memories_fts.rank LIMIT ?2",
                )?;
                stmt.query_map(params![match_expr, limit], |row| {
                    let origin: String = row.get(1)?;
                    let mut metadata = Metadata::new();
                    metadata.insert("category".into(), opt_value(row.get(2)?));
                    metadata.insert("created_at".into(), Value::from(row.get::<_, String>(3)?));
                    Ok(EvidenceItem {
                        source: format!("memory:{}", origin),
                        content: row.get(0)?,
                        metadata,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?
            }
            OracleSource::Omi | OracleSource::Letta => {
                return Err(HubError::Validation(format!(
                    "{} is not a local index",
                    index.as_str()
                )));
            }
        };
        Ok(items)
    }
}

/// Last path segment of a repository path.
pub fn repo_name(repo: &str) -> &str {
    repo.trim_end_matches('/').rsplit('/').next().unwrap_or(repo)
}

fn opt_value(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Normalize a watcher-supplied timestamp; absent means now.
fn capture_time(raw: Option<&str>) -> HubResult<String> {
    match raw {
        None => Ok(now_timestamp()),
        Some(raw) => parse_timestamp(raw)
            .filter(|ts| (1..=9999).contains(&ts.year()))
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .ok_or_else(|| HubError::Validation(format!("unparseable timestamp {:?}", raw))),
    }
}

fn insert_screen(tx: &Transaction, screen: &ScreenCapture) -> HubResult<i64> {
    let timestamp = capture_time(screen.timestamp.as_deref())?;
    tx.execute(
        "INSERT INTO screens (app_name, window_title, ocr_text, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![screen.app_name, screen.window_title, screen.ocr_text, timestamp],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO screens_fts (rowid, ocr_text, app_name, window_title) VALUES (?1, ?2, ?3, ?4)",
        params![id, screen.ocr_text, screen.app_name, screen.window_title],
    )?;
    Ok(id)
}

fn insert_browser_visit(tx: &Transaction, visit: &BrowserVisit) -> HubResult<i64> {
    if visit.url.trim().is_empty() {
        return Err(HubError::Validation("url must not be empty".to_string()));
    }
    let visit_time = capture_time(visit.visit_time.as_deref())?;
    tx.execute(
        "INSERT INTO browser_history (url, title, domain, browser, visit_time)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![visit.url, visit.title, visit.domain, visit.browser, visit_time],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO browser_fts (rowid, title, url, domain) VALUES (?1, ?2, ?3, ?4)",
        params![id, visit.title, visit.url, visit.domain],
    )?;
    Ok(id)
}

fn insert_git_commit(tx: &Transaction, commit: &GitCommit) -> HubResult<i64> {
    if commit.repo.trim().is_empty() || commit.sha.trim().is_empty() {
        return Err(HubError::Validation("repo and sha are required".to_string()));
    }
    let timestamp = capture_time(commit.timestamp.as_deref())?;
    tx.execute(
        "INSERT INTO git_activity (repo, branch, sha, message, files_changed, insertions, deletions, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            commit.repo,
            commit.branch,
            commit.sha,
            commit.message,
            commit.files_changed,
            commit.insertions,
            commit.deletions,
            timestamp
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO git_fts (rowid, message, repo, files_changed) VALUES (?1, ?2, ?3, ?4)",
        params![id, commit.message, commit.repo, commit.files_changed],
    )?;
    Ok(id)
}

fn record_watcher_capture(tx: &Transaction, watcher: &str) -> HubResult<()> {
    let now = now_timestamp();
    tx.execute(
        "INSERT INTO watcher_status (watcher_name, last_run, last_success, items_captured, status)
         VALUES (?1, ?2, ?2, 1, 'running')
         ON CONFLICT(watcher_name) DO UPDATE SET
            last_run = excluded.last_run,
            last_success = excluded.last_success,
            items_captured = watcher_status.items_captured + 1,
            last_error = NULL,
            status = 'running'",
        params![watcher, now],
    )?;
    Ok(())
}
