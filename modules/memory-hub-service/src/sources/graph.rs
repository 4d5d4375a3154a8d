//! Knowledge graph stored as a JSON file of entities and relations.

use async_trait::async_trait;
use memory_hub_types::{Metadata, SourceHealth, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{contains_ci, MemorySource, RawHit};
use crate::error::{HubError, HubResult};

const OBSERVATION_PREVIEW: usize = 3;

#[derive(Debug, Default, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub relation_type: String,
}

impl Graph {
    /// Entity-name hits shadow that entity's observation hits.
    pub fn search(&self, query: &str) -> Vec<RawHit> {
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        for entity in &self.entities {
            if contains_ci(&entity.name, &query_lower) {
                let preview: Vec<&str> = entity
                    .observations
                    .iter()
                    .take(OBSERVATION_PREVIEW)
                    .map(String::as_str)
                    .collect();
                let mut metadata = Metadata::new();
                metadata.insert("type".into(), Value::from("entity"));
                metadata.insert("name".into(), Value::from(entity.name.as_str()));
                metadata.insert("entity_type".into(), Value::from(entity.entity_type.as_str()));
                hits.push(RawHit {
                    content: format!("{} ({}): {}", entity.name, entity.entity_type, preview.join("; ")),
                    timestamp: None,
                    metadata,
                    relevance: Some(0.9),
                });
                continue;
            }

            for observation in &entity.observations {
                if contains_ci(observation, &query_lower) {
                    let mut metadata = Metadata::new();
                    metadata.insert("type".into(), Value::from("observation"));
                    metadata.insert("entity".into(), Value::from(entity.name.as_str()));
                    metadata.insert("entity_type".into(), Value::from(entity.entity_type.as_str()));
                    hits.push(RawHit {
                        content: format!("{}: {}", entity.name, observation),
                        timestamp: None,
                        metadata,
                        relevance: Some(0.7),
                    });
                }
            }
        }

        for relation in &self.relations {
            let matched = [&relation.from, &relation.to, &relation.relation_type]
                .iter()
                .any(|field| contains_ci(field, &query_lower));
            if matched {
                let mut metadata = Metadata::new();
                metadata.insert("type".into(), Value::from("relation"));
                metadata.insert("from".into(), Value::from(relation.from.as_str()));
                metadata.insert("to".into(), Value::from(relation.to.as_str()));
                metadata.insert("relation_type".into(), Value::from(relation.relation_type.as_str()));
                hits.push(RawHit {
                    content: format!("{} --[{}]--> {}", relation.from, relation.relation_type, relation.to),
                    timestamp: None,
                    metadata,
                    relevance: Some(0.6),
                });
            }
        }

        hits
    }
}

pub struct GraphSource {
    path: PathBuf,
}

impl GraphSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Entities with one of `names`, or every entity when `names` is empty.
    /// A missing file has no entities.
    pub async fn get_entities(&self, names: &[String]) -> HubResult<Vec<Entity>> {
        let graph = self.load().await?.unwrap_or_default();
        Ok(graph
            .entities
            .into_iter()
            .filter(|entity| names.is_empty() || names.contains(&entity.name))
            .collect())
    }

    /// `Ok(None)` when the file does not exist.
    async fn load(&self) -> HubResult<Option<Graph>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HubError::unavailable("graph", e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| HubError::unavailable("graph", format!("invalid graph file: {}", e)))
    }
}

#[async_trait]
impl MemorySource for GraphSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Graph
    }

    async fn health(&self) -> SourceHealth {
        match self.load().await {
            Ok(Some(graph)) => {
                let mut detail = Metadata::new();
                detail.insert("entities".into(), Value::from(graph.entities.len()));
                detail.insert("relations".into(), Value::from(graph.relations.len()));
                SourceHealth::ok(detail)
            }
            Ok(None) => SourceHealth::unconfigured("Memory file not found"),
            Err(e) => SourceHealth::error(e.to_string()),
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        _days_back: Option<u32>,
    ) -> HubResult<Vec<RawHit>> {
        let Some(graph) = self.load().await? else {
            log::debug!("[GRAPH] No graph at {}", self.path.display());
            return Ok(Vec::new());
        };
        let mut hits = graph.search(query);
        hits.truncate(limit);
        Ok(hits)
    }
}
