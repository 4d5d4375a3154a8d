//! Local full-text memory cache (memories + memories_fts)
//!
//! A record and its index entry are written, rewritten and removed together in
//! one transaction. Search goes through the FTS5 index first and falls back to
//! a substring scan when the index rejects the query.

use memory_hub_types::{
    CacheHealth, IndexIntegrity, MemoryRecord, Metadata, ResultRecord, SourceKind,
};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::super::{now_timestamp, sql_limit, Db};
use crate::error::{HubError, HubResult};
use crate::ranking::parse_timestamp;

/// Relevance for hits served by the substring scan. Always below any index hit.
pub const FALLBACK_RELEVANCE: f64 = 0.5;

/// Column weights for bm25(): content, source, category.
const BM25_WEIGHTS: &str = "3.0, 1.0, 1.0";

impl Db {
    /// Insert a memory and its index entry. Returns the new id.
    pub fn store_memory(
        &self,
        content: &str,
        source: &str,
        category: Option<&str>,
        metadata: &Metadata,
    ) -> HubResult<i64> {
        if content.trim().is_empty() {
            return Err(HubError::Validation("content must not be empty".to_string()));
        }
        let source = if source.trim().is_empty() { "manual" } else { source };
        let metadata_json = serde_json::to_string(metadata)?;
        let now = now_timestamp();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO memories (content, source, category, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![content, source, category, metadata_json, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO memories_fts (rowid, content, source, category) VALUES (?1, ?2, ?3, ?4)",
            params![id, content, source, category],
        )?;
        tx.commit()?;

        log::debug!("[CACHE] Stored memory #{} (source={})", id, source);
        Ok(id)
    }

    pub fn get_memory(&self, id: i64) -> HubResult<Option<MemoryRecord>> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT id, content, source, category, metadata, created_at, updated_at
                 FROM memories WHERE id = ?1",
                [id],
                row_to_memory,
            )
            .optional()?;
        Ok(record)
    }

    /// Ranked search with a guaranteed substring fallback.
    ///
    /// Index failures (typically malformed match syntax) are logged and never
    /// reach the caller; only a failure of the fallback scan itself does.
    pub fn search_memories(&self, query: &str, limit: usize) -> HubResult<Vec<ResultRecord>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        match self.search_memories_indexed(query, limit) {
            Ok(results) => Ok(results),
            Err(e) => {
                log::warn!(
                    "[CACHE] Index query for {:?} failed, scanning instead: {}",
                    query,
                    e
                );
                self.search_memories_scan(query, limit)
            }
        }
    }

    fn search_memories_indexed(&self, query: &str, limit: usize) -> HubResult<Vec<ResultRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT m.id, m.content, m.source, m.category, m.metadata, m.created_at,
                    bm25(memories_fts, {}) AS rank
             FROM memories_fts
             JOIN memories m ON m.id = memories_fts.rowid
             WHERE memories_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
            BM25_WEIGHTS
        );
        let index_err = |e: rusqlite::Error| HubError::IndexQuery(e.to_string());

        let mut stmt = conn.prepare(&sql).map_err(index_err)?;
        let rows = stmt
            .query_map(params![query, sql_limit(limit)], |row| {
                let rank: f64 = row.get(6)?;
                row_to_result(row, relevance_from_bm25(rank))
            })
            .map_err(index_err)?;
        // Match syntax errors surface while stepping, so every row is checked.
        rows.collect::<Result<Vec<_>, _>>().map_err(index_err)
    }

    fn search_memories_scan(&self, query: &str, limit: usize) -> HubResult<Vec<ResultRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, source, category, metadata, created_at
             FROM memories
             WHERE content LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![like_pattern(query), sql_limit(limit)], |row| {
            row_to_result(row, FALLBACK_RELEVANCE)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent memories first, optionally restricted to one source.
    pub fn get_recent_memories(
        &self,
        limit: usize,
        source: Option<&str>,
    ) -> HubResult<Vec<MemoryRecord>> {
        let conn = self.conn();
        let records = match source {
            Some(source) => {
                let mut stmt = conn.prepare(
                    "SELECT id, content, source, category, metadata, created_at, updated_at
                     FROM memories WHERE source = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![source, sql_limit(limit)], row_to_memory)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, content, source, category, metadata, created_at, updated_at
                     FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([sql_limit(limit)], row_to_memory)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    /// Rewrite a memory and its index entry. Unset fields keep their value.
    pub fn update_memory(
        &self,
        id: i64,
        content: Option<&str>,
        category: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> HubResult<MemoryRecord> {
        if let Some(c) = content {
            if c.trim().is_empty() {
                return Err(HubError::Validation("content must not be empty".to_string()));
            }
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT id, content, source, category, metadata, created_at, updated_at
                 FROM memories WHERE id = ?1",
                [id],
                row_to_memory,
            )
            .optional()?
            .ok_or_else(|| HubError::NotFound(format!("memory #{}", id)))?;

        let content = content.unwrap_or(&existing.content);
        let category = category.or(existing.category.as_deref());
        let metadata_json = serde_json::to_string(metadata.unwrap_or(&existing.metadata))?;
        let now = now_timestamp();

        tx.execute(
            "UPDATE memories SET content = ?1, category = ?2, metadata = ?3, updated_at = ?4
             WHERE id = ?5",
            params![content, category, metadata_json, now, id],
        )?;
        tx.execute("DELETE FROM memories_fts WHERE rowid = ?1", [id])?;
        tx.execute(
            "INSERT INTO memories_fts (rowid, content, source, category) VALUES (?1, ?2, ?3, ?4)",
            params![id, content, existing.source, category],
        )?;
        let updated = tx.query_row(
            "SELECT id, content, source, category, metadata, created_at, updated_at
             FROM memories WHERE id = ?1",
            [id],
            row_to_memory,
        )?;
        tx.commit()?;

        log::debug!("[CACHE] Updated memory #{}", id);
        Ok(updated)
    }

    /// Remove a memory and its index entry. Returns false when nothing existed.
    pub fn delete_memory(&self, id: i64) -> HubResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let rows = tx.execute("DELETE FROM memories WHERE id = ?1", [id])?;
        tx.execute("DELETE FROM memories_fts WHERE rowid = ?1", [id])?;
        tx.commit()?;

        if rows > 0 {
            log::debug!("[CACHE] Deleted memory #{}", id);
        }
        Ok(rows > 0)
    }

    /// Compare base records against index entries.
    pub fn verify_index(&self) -> HubResult<IndexIntegrity> {
        let conn = self.conn();
        let records: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let index_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM memories_fts", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT rowid FROM memories_fts
             WHERE rowid NOT IN (SELECT id FROM memories) ORDER BY rowid",
        )?;
        let orphaned_entries = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM memories
             WHERE id NOT IN (SELECT rowid FROM memories_fts) ORDER BY id",
        )?;
        let missing_entries = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(IndexIntegrity {
            records,
            index_entries,
            orphaned_entries,
            missing_entries,
        })
    }

    /// Regenerate every index entry from the base records.
    pub fn rebuild_index(&self) -> HubResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memories_fts", [])?;
        let count = tx.execute(
            "INSERT INTO memories_fts (rowid, content, source, category)
             SELECT id, content, source, category FROM memories",
            [],
        )?;
        tx.commit()?;

        log::info!("[CACHE] Rebuilt index for {} memories", count);
        Ok(count)
    }

    /// Diagnostics only; never fails.
    pub fn cache_health(&self) -> CacheHealth {
        let conn = self.conn();
        match conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get::<_, i64>(0)) {
            Ok(count) => CacheHealth {
                status: "ok".to_string(),
                record_count: Some(count),
                path: self.path().to_string(),
                error: None,
            },
            Err(e) => CacheHealth {
                status: "error".to_string(),
                record_count: None,
                path: self.path().to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Substring pattern that matches `%` and `_` literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// bm25() is negative with better matches further below zero.
fn relevance_from_bm25(rank: f64) -> f64 {
    1.0 + (-rank).max(0.0)
}

fn parse_metadata(raw: Option<String>) -> Metadata {
    raw.and_then(|s| serde_json::from_str::<Metadata>(&s).ok())
        .unwrap_or_default()
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
    Ok(MemoryRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        source: row.get(2)?,
        category: row.get(3)?,
        metadata: parse_metadata(row.get(4)?),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Columns: id, content, source, category, metadata, created_at.
fn row_to_result(row: &rusqlite::Row, relevance: f64) -> rusqlite::Result<ResultRecord> {
    let id: i64 = row.get(0)?;
    let source: String = row.get(2)?;
    let category: Option<String> = row.get(3)?;
    let created_at: String = row.get(5)?;

    let mut metadata = parse_metadata(row.get(4)?);
    metadata.insert("type".to_string(), Value::from("local"));
    metadata.insert("id".to_string(), Value::from(id));
    metadata.insert("source".to_string(), Value::from(source));
    metadata.insert(
        "category".to_string(),
        category.map(Value::from).unwrap_or(Value::Null),
    );

    Ok(ResultRecord {
        source: SourceKind::Local,
        content: row.get(1)?,
        timestamp: parse_timestamp(&created_at),
        metadata,
        relevance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Db {
        Db::open(":memory:").unwrap()
    }

    fn store(db: &Db, content: &str) -> i64 {
        db.store_memory(content, "manual", None, &Metadata::new()).unwrap()
    }

    #[test]
    fn test_store_then_search_uses_index() {
        let db = open();
        let id = store(&db, "Discussed auth rollout with Sam");

        let results = db.search_memories("auth", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, SourceKind::Local);
        assert_eq!(results[0].metadata["id"], Value::from(id));
        assert_eq!(results[0].metadata["type"], "local");
        assert!(results[0].relevance >= 1.0);
        assert!(results[0].timestamp.is_some());
    }

    #[test]
    fn test_exact_content_search_stays_on_index() {
        let db = open();
        store(&db, "Discussed auth rollout with Sam");
        store(&db, "Lunch order for Friday");

        let results = db
            .search_memories("Discussed auth rollout with Sam", 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].relevance >= 1.0);
    }

    #[test]
    fn test_empty_content_is_rejected() {
        let db = open();
        let err = db
            .store_memory("   ", "manual", None, &Metadata::new())
            .unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
        assert_eq!(db.verify_index().unwrap().records, 0);
    }

    #[test]
    fn test_malformed_query_falls_back_to_scan() {
        let db = open();
        store(&db, "Renamed the \"beta flag before launch");

        let results = db.search_memories("\"beta", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relevance, FALLBACK_RELEVANCE);
    }

    #[test]
    fn test_fallback_scan_treats_wildcards_literally() {
        let db = open();
        store(&db, "Set \"50% off banner");
        store(&db, "Set \"500 items banner");
        store(&db, "Key \"a_b rotated");
        store(&db, "Key \"axb rotated");

        let percent = db.search_memories("\"50%", 10).unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].content, "Set \"50% off banner");

        let underscore = db.search_memories("\"a_b", 10).unwrap();
        assert_eq!(underscore.len(), 1);
        assert_eq!(underscore[0].content, "Key \"a_b rotated");
    }

    #[test]
    fn test_huge_limit_is_not_negative() {
        let db = open();
        store(&db, "Discussed auth rollout with Sam");
        store(&db, "Auth review moved to Thursday");

        assert_eq!(db.search_memories("auth", usize::MAX).unwrap().len(), 2);
        assert_eq!(db.get_recent_memories(usize::MAX, None).unwrap().len(), 2);
    }

    #[test]
    fn test_index_hits_outrank_fallback() {
        assert!(relevance_from_bm25(-0.000001) >= 1.0);
        assert!(relevance_from_bm25(-4.2) > relevance_from_bm25(-1.0));
        assert!(relevance_from_bm25(0.3) > FALLBACK_RELEVANCE);
    }

    #[test]
    fn test_metadata_and_category_round_trip() {
        let db = open();
        let mut metadata = Metadata::new();
        metadata.insert("speaker".to_string(), Value::from("Sam"));
        let id = db
            .store_memory("Sam prefers async standups", "omi", Some("preference"), &metadata)
            .unwrap();

        let record = db.get_memory(id).unwrap().unwrap();
        assert_eq!(record.source, "omi");
        assert_eq!(record.category.as_deref(), Some("preference"));
        assert_eq!(record.metadata["speaker"], "Sam");

        // Category is part of the searchable text.
        let results = db.search_memories("preference", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["speaker"], "Sam");
    }

    #[test]
    fn test_delete_removes_index_entry() {
        let db = open();
        let keep = store(&db, "auth token rotation schedule");
        let gone = store(&db, "auth rollout retro notes");

        assert!(db.delete_memory(gone).unwrap());
        let results = db.search_memories("auth", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["id"], Value::from(keep));

        let integrity = db.verify_index().unwrap();
        assert!(integrity.is_consistent());
        assert_eq!(integrity.records, 1);
        assert!(integrity.orphaned_entries.is_empty());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let db = open();
        assert!(!db.delete_memory(404).unwrap());
    }

    #[test]
    fn test_update_rewrites_index() {
        let db = open();
        let id = store(&db, "Kickoff planned for Monday");

        let updated = db
            .update_memory(id, Some("Kickoff moved to Wednesday"), Some("schedule"), None)
            .unwrap();
        assert_eq!(updated.content, "Kickoff moved to Wednesday");
        assert_eq!(updated.category.as_deref(), Some("schedule"));

        assert!(db.search_memories("Monday", 10).unwrap().is_empty());
        assert_eq!(db.search_memories("Wednesday", 10).unwrap().len(), 1);
        assert!(db.verify_index().unwrap().is_consistent());
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let db = open();
        let err = db.update_memory(9, Some("x"), None, None).unwrap_err();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[test]
    fn test_recent_orders_newest_first_and_filters() {
        let db = open();
        let first = store(&db, "first note");
        let _ = db
            .store_memory("pendant transcript", "omi", None, &Metadata::new())
            .unwrap();
        let third = store(&db, "third note");

        let recent = db.get_recent_memories(10, None).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, third);
        assert_eq!(recent[2].id, first);

        let manual = db.get_recent_memories(10, Some("manual")).unwrap();
        assert_eq!(manual.len(), 2);
        assert!(manual.iter().all(|m| m.source == "manual"));

        assert_eq!(db.get_recent_memories(1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_verify_detects_and_rebuild_repairs_drift() {
        let db = open();
        let id = store(&db, "drifted record");
        db.conn()
            .execute("DELETE FROM memories_fts WHERE rowid = ?1", [id])
            .unwrap();

        let integrity = db.verify_index().unwrap();
        assert_eq!(integrity.missing_entries, vec![id]);
        assert!(!integrity.is_consistent());

        assert_eq!(db.rebuild_index().unwrap(), 1);
        assert!(db.verify_index().unwrap().is_consistent());
    }

    #[test]
    fn test_cache_health_reports_count() {
        let db = open();
        store(&db, "one");
        let health = db.cache_health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.record_count, Some(1));
        assert_eq!(health.path, ":memory:");
    }
}
