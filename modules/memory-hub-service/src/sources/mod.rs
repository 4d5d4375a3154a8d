//! Memory backends behind one search/health contract.
//!
//! Each adapter reports failures as `HubError::BackendUnavailable`; recovering
//! from them is the caller's job (see `fanout` and `oracle`).

pub mod graph;
pub mod letta;
pub mod local;
pub mod omi;

use async_trait::async_trait;
use memory_hub_types::{Metadata, SourceHealth, SourceKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::HubResult;

/// An un-normalized hit as an adapter produces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHit {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub relevance: Option<f64>,
}

#[async_trait]
pub trait MemorySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn health(&self) -> SourceHealth;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        days_back: Option<u32>,
    ) -> HubResult<Vec<RawHit>>;
}

/// The configured adapters, looked up by kind.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn MemorySource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any earlier one of the same kind.
    pub fn register(&mut self, source: Arc<dyn MemorySource>) {
        let kind = source.kind();
        self.sources.retain(|s| s.kind() != kind);
        self.sources.push(source);
    }

    pub fn with(mut self, source: Arc<dyn MemorySource>) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn MemorySource>> {
        self.sources.iter().find(|s| s.kind() == kind).cloned()
    }

    /// Registered kinds in canonical order.
    pub fn kinds(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    /// Resolve requested names to registered adapters. `"all"` expands to every
    /// registered kind; unknown or unregistered names are dropped with a
    /// warning; repeats keep their first position.
    pub fn resolve(&self, requested: &[String]) -> Vec<Arc<dyn MemorySource>> {
        if requested.iter().any(|name| name.trim().eq_ignore_ascii_case("all")) {
            return self.kinds().into_iter().filter_map(|k| self.get(k)).collect();
        }

        let mut resolved: Vec<Arc<dyn MemorySource>> = Vec::new();
        for name in requested {
            let Some(kind) = SourceKind::from_name(name) else {
                log::warn!("[FANOUT] Ignoring unknown source {:?}", name);
                continue;
            };
            if resolved.iter().any(|s| s.kind() == kind) {
                continue;
            }
            match self.get(kind) {
                Some(source) => resolved.push(source),
                None => log::warn!("[FANOUT] Source {} is not registered", kind),
            }
        }
        resolved
    }
}

/// Case-insensitive substring test shared by the remote adapters.
pub(crate) fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
