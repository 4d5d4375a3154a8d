//! Letta agent API: message history and core memory blocks.

use async_trait::async_trait;
use memory_hub_types::{HealthState, Metadata, SourceHealth, SourceKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{contains_ci, truncate_chars, MemorySource, RawHit};
use crate::config::LettaConfig;
use crate::error::{HubError, HubResult};

const MESSAGE_WINDOW: usize = 100;
const CONTENT_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageListing {
    Wrapped { messages: Vec<LettaMessage> },
    Bare(Vec<LettaMessage>),
}

#[derive(Debug, Deserialize)]
struct LettaMessage {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    role: Value,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    text: Value,
    created_at: Option<String>,
}

impl LettaMessage {
    /// Only plain-string bodies are searchable.
    fn body(&self) -> Option<&str> {
        self.content
            .as_str()
            .filter(|s| !s.is_empty())
            .or_else(|| self.text.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MemoryListing {
    Nested { memory: BlockList },
    Flat(BlockList),
}

#[derive(Debug, Deserialize)]
struct BlockList {
    #[serde(default)]
    blocks: Vec<MemoryBlock>,
}

/// A core memory block. Serialized with its text under `content`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub label: Option<String>,
    #[serde(default, rename(serialize = "content"))]
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl MemoryListing {
    fn into_blocks(self) -> Vec<MemoryBlock> {
        match self {
            MemoryListing::Nested { memory } => memory.blocks,
            MemoryListing::Flat(list) => list.blocks,
        }
    }
}

fn match_messages(query_lower: &str, listing: MessageListing) -> Vec<RawHit> {
    let messages = match listing {
        MessageListing::Wrapped { messages } => messages,
        MessageListing::Bare(messages) => messages,
    };
    messages
        .into_iter()
        .filter_map(|msg| {
            let body = msg.body()?;
            if !contains_ci(body, query_lower) {
                return None;
            }
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), Value::from("letta_message"));
            metadata.insert("role".into(), msg.role.clone());
            metadata.insert("message_id".into(), msg.id.clone());
            Some(RawHit {
                content: truncate_chars(body, CONTENT_CHARS),
                timestamp: msg.created_at.clone(),
                metadata,
                relevance: Some(0.8),
            })
        })
        .collect()
}

fn match_blocks(query_lower: &str, blocks: Vec<MemoryBlock>) -> Vec<RawHit> {
    blocks
        .into_iter()
        .filter(|block| contains_ci(&block.value, query_lower))
        .map(|block| {
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), Value::from("letta_memory_block"));
            metadata.insert("label".into(), block.label.map(Value::from).unwrap_or(Value::Null));
            RawHit {
                content: truncate_chars(&block.value, CONTENT_CHARS),
                timestamp: None,
                metadata,
                relevance: Some(0.9),
            }
        })
        .collect()
}

pub struct LettaSource {
    config: LettaConfig,
    client: Client,
}

impl LettaSource {
    pub fn new(config: LettaConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Key and agent id, or the reason the adapter is unusable.
    fn credentials(&self) -> Result<(&str, &str), &'static str> {
        let key = self.config.api_key.as_deref().ok_or("LETTA_API_KEY not set")?;
        let agent = self.config.agent_id.as_deref().ok_or("LETTA_AGENT_ID not set")?;
        Ok((key, agent))
    }

    fn agent_url(&self, agent: &str, suffix: &str) -> String {
        format!(
            "{}/v1/agents/{}{}",
            self.config.api_base.trim_end_matches('/'),
            agent,
            suffix
        )
    }

    /// The agent's core memory blocks.
    pub async fn get_memories(&self) -> HubResult<Vec<MemoryBlock>> {
        let (key, agent) = self
            .credentials()
            .map_err(|reason| HubError::unavailable("letta", reason))?;
        let listing: MemoryListing = self.get_json(self.agent_url(agent, "/memory"), key, &[]).await?;
        Ok(listing.into_blocks())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        key: &str,
        query: &[(&str, String)],
    ) -> HubResult<T> {
        self.client
            .get(url)
            .bearer_auth(key)
            .query(query)
            .send()
            .await
            .map_err(|e| HubError::unavailable("letta", e))?
            .error_for_status()
            .map_err(|e| HubError::unavailable("letta", e))?
            .json::<T>()
            .await
            .map_err(|e| HubError::unavailable("letta", format!("unexpected response: {}", e)))
    }
}

#[async_trait]
impl MemorySource for LettaSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Letta
    }

    async fn health(&self) -> SourceHealth {
        let (key, agent) = match self.credentials() {
            Ok(creds) => creds,
            Err(reason) => return SourceHealth::unconfigured(reason),
        };
        match self
            .client
            .get(self.agent_url(agent, ""))
            .bearer_auth(key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let mut detail = Metadata::new();
                detail.insert("agent_id".into(), Value::from(agent));
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
        _days_back: Option<u32>,
    ) -> HubResult<Vec<RawHit>> {
        let (key, agent) = match self.credentials() {
            Ok(creds) => creds,
            Err(reason) => {
                log::debug!("[LETTA] Skipping search: {}", reason);
                return Ok(Vec::new());
            }
        };
        let query_lower = query.to_lowercase();

        let messages: MessageListing = self
            .get_json(
                self.agent_url(agent, "/messages"),
                key,
                &[("limit", MESSAGE_WINDOW.to_string())],
            )
            .await?;
        let mut hits = match_messages(&query_lower, messages);

        match self.get_memories().await {
            Ok(blocks) => hits.extend(match_blocks(&query_lower, blocks)),
            Err(e) => log::warn!("[LETTA] Memory block fetch failed: {}", e),
        }

        hits.truncate(limit);
        log::debug!("[LETTA] {} hits for {:?}", hits.len(), query);
        Ok(hits)
    }
}
