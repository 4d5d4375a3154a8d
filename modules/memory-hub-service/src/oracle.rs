//! Question answering over captured activity.
//!
//! A question becomes a handful of keyword probes against the local capture
//! and memory indexes plus one full-question search per external adapter.
//! Evidence is deduplicated and summarized with a fixed template.

use futures_util::future::join_all;
use memory_hub_types::{EvidenceItem, OracleRequest, OracleResponse, OracleSource, SourceKind};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::OracleConfig;
use crate::db::tables::captures::repo_name;
use crate::db::Db;
use crate::fanout::{bounded_search, elapsed_ms, FanOut};
use crate::sources::truncate_chars;

pub const NO_RESULTS_ANSWER: &str =
    "No matching records found for your query. Try different keywords or expand the time range.";

const CLAUSE_CAP: usize = 5;

pub struct Oracle {
    db: Arc<Db>,
    fanout: FanOut,
    config: OracleConfig,
}

impl Oracle {
    pub fn new(db: Arc<Db>, fanout: FanOut, config: OracleConfig) -> Self {
        Self { db, fanout, config }
    }

    pub async fn ask(&self, request: &OracleRequest) -> OracleResponse {
        let started = Instant::now();
        let sources = resolve_sources(&request.sources);
        let keywords = extract_keywords(&request.question);
        let probe_keywords = &keywords[..keywords.len().min(self.config.max_keywords.max(1))];
        let per_keyword = self.config.per_keyword_limit(request.limit);
        let per_adapter = self.config.per_adapter_limit(request.limit);

        // Category order, then keyword order.
        let local_probes = sources
            .iter()
            .filter(|s| s.is_local_index())
            .flat_map(|index| probe_keywords.iter().map(move |kw| (*index, kw.clone())))
            .map(|(index, keyword)| {
                let db = Arc::clone(&self.db);
                async move {
                    let expr = fts_phrase(&keyword);
                    let result =
                        tokio::task::spawn_blocking(move || db.probe_index(index, &expr, per_keyword))
                            .await;
                    match result {
                        Ok(Ok(items)) => items,
                        Ok(Err(e)) => {
                            log::warn!("[ORACLE] {} probe for {:?} failed: {}", index.as_str(), keyword, e);
                            Vec::new()
                        }
                        Err(e) => {
                            log::error!("[ORACLE] {} probe task failed: {}", index.as_str(), e);
                            Vec::new()
                        }
                    }
                }
            });

        let adapter_probes = sources
            .iter()
            .filter_map(|s| match s {
                OracleSource::Omi => Some(SourceKind::Omi),
                OracleSource::Letta => Some(SourceKind::Letta),
                _ => None,
            })
            .filter_map(|kind| self.fanout.registry().get(kind))
            .map(|source| {
                let timeout = self.fanout.timeout();
                async move {
                    let kind = source.kind();
                    match bounded_search(
                        source.as_ref(),
                        &request.question,
                        per_adapter,
                        request.days_back,
                        timeout,
                    )
                    .await
                    {
                        Ok(hits) => hits
                            .into_iter()
                            .map(|hit| EvidenceItem {
                                source: kind.as_str().to_string(),
                                content: hit.content,
                                metadata: hit.metadata,
                            })
                            .collect::<Vec<_>>(),
                        Err(e) => {
                            log::warn!("[ORACLE] {} search failed: {}", kind, e);
                            Vec::new()
                        }
                    }
                }
            });

        let (local, remote) = tokio::join!(join_all(local_probes), join_all(adapter_probes));
        let gathered: Vec<EvidenceItem> = local.into_iter().chain(remote).flatten().collect();
        let evidence = self.dedup(gathered, request.limit);
        let answer = synthesize_answer(&evidence);

        let query_time_ms = elapsed_ms(started);
        log::debug!(
            "[ORACLE] {:?}: {} evidence items in {:.2}ms",
            request.question,
            evidence.len(),
            query_time_ms
        );

        OracleResponse {
            question: request.question.clone(),
            answer,
            evidence,
            sources_queried: sources,
            query_time_ms,
        }
    }

    /// Truncate content, drop items whose leading characters were already
    /// seen (first wins), then cap the count.
    fn dedup(&self, items: Vec<EvidenceItem>, limit: usize) -> Vec<EvidenceItem> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .map(|mut item| {
                item.content = truncate_chars(&item.content, self.config.content_chars);
                item
            })
            .filter(|item| seen.insert(truncate_chars(&item.content, self.config.dedup_prefix_chars)))
            .take(limit)
            .collect()
    }
}

/// `"all"` expands to every category; otherwise unknown names are dropped and
/// the rest are put in canonical order.
pub fn resolve_sources(requested: &[String]) -> Vec<OracleSource> {
    if requested.iter().any(|s| s.trim().eq_ignore_ascii_case("all")) {
        return OracleSource::ALL.to_vec();
    }
    let mut wanted = HashSet::new();
    for name in requested {
        match OracleSource::from_name(name) {
            Some(source) => {
                wanted.insert(source);
            }
            None => log::warn!("[ORACLE] Ignoring unknown source {:?}", name),
        }
    }
    OracleSource::ALL
        .into_iter()
        .filter(|s| wanted.contains(s))
        .collect()
}

/// Lower-cased tokens longer than three characters, or the whole lower-cased
/// question when none qualify.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    let keywords: Vec<String> = lower
        .split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .map(str::to_string)
        .collect();
    if keywords.is_empty() {
        vec![lower.trim().to_string()]
    } else {
        keywords
    }
}

/// Quote a keyword as a single FTS5 phrase so user punctuation never reaches
/// the query parser.
fn fts_phrase(keyword: &str) -> String {
    format!("\"{}\"", keyword.replace('"', "\"\""))
}

pub fn synthesize_answer(evidence: &[EvidenceItem]) -> String {
    if evidence.is_empty() {
        return NO_RESULTS_ANSWER.to_string();
    }

    let source_count = evidence.iter().map(|e| e.source.as_str()).collect::<HashSet<_>>().len();
    let mut answer = format!(
        "Found {} relevant {} across {} {}.",
        evidence.len(),
        plural(evidence.len(), "item", "items"),
        source_count,
        plural(source_count, "source", "sources"),
    );

    let apps = distinct(evidence.iter().filter(|e| e.is_screen()).filter_map(|e| e.metadata_str("app")));
    let repos = distinct(
        evidence
            .iter()
            .filter(|e| e.is_git())
            .filter_map(|e| e.metadata_str("repo"))
            .map(repo_name),
    );
    let domains = distinct(
        evidence
            .iter()
            .filter(|e| e.is_browser())
            .filter_map(|e| e.metadata_str("domain")),
    );

    for (label, values) in [
        ("Screen activity in", apps),
        ("Git commits in", repos),
        ("Browsed", domains),
    ] {
        if !values.is_empty() {
            answer.push_str(&format!(" {}: {}.", label, values.join(", ")));
        }
    }
    answer
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 { one } else { many }
}

/// Sorted, non-empty, capped.
fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    values
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(CLAUSE_CAP)
        .collect()
}
