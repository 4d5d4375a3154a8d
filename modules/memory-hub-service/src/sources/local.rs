use async_trait::async_trait;
use memory_hub_types::{HealthState, Metadata, SourceHealth, SourceKind};
use serde_json::Value;
use std::sync::Arc;

use super::{MemorySource, RawHit};
use crate::db::Db;
use crate::error::{HubError, HubResult};

/// The local full-text cache as a fan-out source.
pub struct LocalSource {
    db: Arc<Db>,
}

impl LocalSource {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemorySource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn health(&self) -> SourceHealth {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || db.cache_health()).await {
            Ok(cache) => {
                let mut detail = Metadata::new();
                detail.insert("path".into(), Value::from(cache.path));
                if let Some(count) = cache.record_count {
                    detail.insert("memory_count".into(), Value::from(count));
                }
                match cache.error {
                    Some(error) => {
                        detail.insert("error".into(), Value::from(error));
                        SourceHealth {
                            status: HealthState::Error,
                            detail,
                        }
                    }
                    None => SourceHealth::ok(detail),
                }
            }
            Err(e) => SourceHealth::error(e.to_string()),
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        _days_back: Option<u32>,
    ) -> HubResult<Vec<RawHit>> {
        let db = Arc::clone(&self.db);
        let query = query.to_string();
        let records = tokio::task::spawn_blocking(move || db.search_memories(&query, limit))
            .await?
            .map_err(|e| HubError::unavailable("local", e))?;

        Ok(records
            .into_iter()
            .map(|r| RawHit {
                content: r.content,
                timestamp: r.timestamp.map(|ts| ts.to_rfc3339()),
                metadata: r.metadata,
                relevance: Some(r.relevance),
            })
            .collect())
    }
}
