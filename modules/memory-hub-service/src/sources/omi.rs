//! Omi wearable API: stored memories and conversation transcripts.
//!
//! The API has no server-side search, so hits are found by substring match
//! over a window of recent memories and conversations.

use async_trait::async_trait;
use memory_hub_types::{HealthState, Metadata, SourceHealth, SourceKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use super::{contains_ci, MemorySource, RawHit};
use crate::config::OmiConfig;
use crate::error::{HubError, HubResult};
use crate::ranking::lookback_cutoff;

const DEFAULT_CONVERSATION_DAYS: u32 = 30;
const LEAD_CHARS: usize = 100;

// =====================================================
// Wire Types
// =====================================================

/// Omi list endpoints answer either `{"<key>": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Memories { memories: Vec<T> },
    Conversations { conversations: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Memories { memories } => memories,
            Listing::Conversations { conversations } => conversations,
            Listing::Bare(items) => items,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OmiMemory {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub content: String,
    pub category: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OmiConversation {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub title: Option<String>,
    pub started_at: Option<String>,
    #[serde(default, alias = "transcript_segments")]
    pub transcript: Vec<OmiSegment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OmiSegment {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub speaker: Value,
}

// =====================================================
// Matching
// =====================================================

fn match_memories(query_lower: &str, memories: Vec<OmiMemory>) -> Vec<RawHit> {
    memories
        .into_iter()
        .filter(|m| contains_ci(&m.content, query_lower))
        .map(|m| {
            let lead: String = m.content.chars().take(LEAD_CHARS).collect();
            let relevance = if contains_ci(&lead, query_lower) { 0.8 } else { 0.5 };
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), Value::from("memory"));
            metadata.insert("category".into(), m.category.map(Value::from).unwrap_or(Value::Null));
            metadata.insert("id".into(), m.id);
            RawHit {
                content: m.content,
                timestamp: m.created_at,
                metadata,
                relevance: Some(relevance),
            }
        })
        .collect()
}

fn match_conversations(query_lower: &str, conversations: Vec<OmiConversation>) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for convo in conversations {
        for segment in convo.transcript {
            if !contains_ci(&segment.text, query_lower) {
                continue;
            }
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), Value::from("conversation"));
            metadata.insert("conversation_id".into(), convo.id.clone());
            metadata.insert("speaker".into(), segment.speaker);
            hits.push(RawHit {
                content: segment.text,
                timestamp: convo.started_at.clone(),
                metadata,
                relevance: Some(0.7),
            });
        }
    }
    hits
}

// =====================================================
// Adapter
// =====================================================

pub struct OmiSource {
    config: OmiConfig,
    client: Client,
}

impl OmiSource {
    pub fn new(config: OmiConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> HubResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| HubError::unavailable("omi", "OMI_API_KEY not set"))
    }

    async fn get_listing<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> HubResult<Vec<T>> {
        let key = self.api_key()?;
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(key)
            .query(query)
            .send()
            .await
            .map_err(|e| HubError::unavailable("omi", e))?
            .error_for_status()
            .map_err(|e| HubError::unavailable("omi", e))?;
        let listing: Listing<T> = resp
            .json()
            .await
            .map_err(|e| HubError::unavailable("omi", format!("unexpected response: {}", e)))?;
        Ok(listing.into_items())
    }

    /// Stored memories, optionally restricted to some categories.
    pub async fn get_memories(
        &self,
        limit: usize,
        categories: &[String],
    ) -> HubResult<Vec<OmiMemory>> {
        let mut query = vec![("limit", limit.to_string())];
        if !categories.is_empty() {
            query.push(("categories", categories.join(",")));
        }
        self.get_listing("/memories", &query).await
    }

    /// Conversations started within the last `days_back` days.
    pub async fn get_conversations(
        &self,
        limit: usize,
        days_back: u32,
    ) -> HubResult<Vec<OmiConversation>> {
        let start = lookback_cutoff(days_back).ok_or_else(|| {
            HubError::Validation(format!("days_back {} is out of range", days_back))
        })?;
        let query = [
            ("limit", limit.to_string()),
            ("start_date", start.format("%Y-%m-%d").to_string()),
        ];
        self.get_listing("/conversations", &query).await
    }

    /// Mirror a memory into Omi.
    pub async fn create_memory(&self, content: &str, category: &str) -> HubResult<()> {
        let key = self.api_key()?;
        self.client
            .post(self.url("/memories"))
            .bearer_auth(key)
            .json(&json!({ "content": content, "category": category }))
            .send()
            .await
            .map_err(|e| HubError::unavailable("omi", e))?
            .error_for_status()
            .map_err(|e| HubError::unavailable("omi", e))?;
        Ok(())
    }
}

#[async_trait]
impl MemorySource for OmiSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Omi
    }

    async fn health(&self) -> SourceHealth {
        let Ok(key) = self.api_key() else {
            return SourceHealth::unconfigured("OMI_API_KEY not set");
        };
        let started = Instant::now();
        let result = self
            .client
            .get(self.url("/memories"))
            .bearer_auth(key)
            .query(&[("limit", "1")])
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                let mut detail = Metadata::new();
                detail.insert(
                    "latency_ms".into(),
                    Value::from(started.elapsed().as_secs_f64() * 1000.0),
                );
                SourceHealth::ok(detail)
            }
            Ok(resp) => {
                let mut detail = Metadata::new();
                detail.insert("code".into(), Value::from(resp.status().as_u16()));
                SourceHealth {
                    status: HealthState::Error,
                    detail,
                }
            }
            Err(e) => SourceHealth::error(e.to_string()),
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        days_back: Option<u32>,
    ) -> HubResult<Vec<RawHit>> {
        if !self.is_configured() {
            log::debug!("[OMI] Skipping search, no API key");
            return Ok(Vec::new());
        }
        let query_lower = query.to_lowercase();

        let memories = self.get_memories(limit.saturating_mul(2), &[]).await?;
        let mut hits = match_memories(&query_lower, memories);

        let days = days_back.unwrap_or(DEFAULT_CONVERSATION_DAYS);
        // Memories found so far survive a failing conversations fetch.
        match self.get_conversations(limit, days).await {
            Ok(conversations) => hits.extend(match_conversations(&query_lower, conversations)),
            Err(e) => log::warn!("[OMI] Conversation fetch failed: {}", e),
        }

        hits.truncate(limit);
        log::debug!("[OMI] {} hits for {:?}", hits.len(), query);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answer every request on a local port with `body`.
    async fn serve_json(body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn configured(api_base: String) -> OmiSource {
        OmiSource::new(
            OmiConfig {
                api_base,
                api_key: Some("test-key".to_string()),
            },
            build_client(std::time::Duration::from_secs(2)).unwrap(),
        )
    }

    const MEMORIES: &str =
        r#"{"memories": [{"id": "m1", "content": "Auth rollout notes", "category": "work"}]}"#;

    #[tokio::test]
    async fn test_out_of_range_lookback_keeps_memory_hits() {
        let source = configured(serve_json(MEMORIES).await);

        let hits = source.search("auth", 5, Some(u32::MAX)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Auth rollout notes");
        assert_eq!(source.search("auth", usize::MAX, None).await.unwrap().len(), 1);

        assert!(matches!(
            source.get_conversations(5, u32::MAX).await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_get_memories_returns_listing() {
        let source = configured(serve_json(MEMORIES).await);
        let memories = source
            .get_memories(usize::MAX, &["work".to_string()])
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].category.as_deref(), Some("work"));
    }

    #[test]
    fn test_memory_relevance_depends_on_lead() {
        let listing: Listing<OmiMemory> = serde_json::from_value(json!({
            "memories": [
                {"id": "m1", "content": "Auth rollout slipped a week", "category": "work", "created_at": "2026-10-14T10:00:00Z"},
                {"id": "m2", "content": format!("{} then we talked about auth", "x".repeat(120))},
                {"id": "m3", "content": "Groceries"}
            ]
        }))
        .unwrap();

        let hits = match_memories("auth", listing.into_items());
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].relevance, Some(0.8));
        assert_eq!(hits[0].metadata["category"], "work");
        assert_eq!(hits[1].relevance, Some(0.5));
        assert!(hits[1].timestamp.is_none());
    }

    #[test]
    fn test_conversation_segments_match_individually() {
        let listing: Listing<OmiConversation> = serde_json::from_value(json!([
            {
                "id": 42,
                "started_at": "2026-10-15 09:00:00",
                "transcript_segments": [
                    {"text": "Did the auth fix ship?", "speaker": "SPEAKER_1"},
                    {"text": "Not yet", "speaker": "SPEAKER_0"},
                    {"text": "AUTH is blocked on review", "speaker": "SPEAKER_0"}
                ]
            }
        ]))
        .unwrap();

        let hits = match_conversations("auth", listing.into_items());
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.relevance == Some(0.7)));
        assert_eq!(hits[0].metadata["conversation_id"], 42);
        assert_eq!(hits[1].metadata["speaker"], "SPEAKER_0");
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_is_quiet() {
        let source = OmiSource::new(
            OmiConfig {
                api_base: "http://127.0.0.1:9".to_string(),
                api_key: None,
            },
            build_client(std::time::Duration::from_secs(1)).unwrap(),
        );
        assert!(source.search("auth", 5, None).await.unwrap().is_empty());
        assert_eq!(source.health().await.status, HealthState::Unconfigured);
        assert!(matches!(
            source.create_memory("x", "auto").await,
            Err(HubError::BackendUnavailable { .. })
        ));
    }
}
