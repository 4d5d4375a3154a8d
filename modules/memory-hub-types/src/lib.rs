//! Shared types for the memory hub service and its RPC clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Open, source-specific metadata attached to hits and records.
pub type Metadata = Map<String, Value>;

// =====================================================
// Sources
// =====================================================

/// A backend that the unified search fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Omi,
    Letta,
    Graph,
    Local,
}

impl SourceKind {
    /// Resolution order for the `"all"` sentinel.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Omi,
        SourceKind::Letta,
        SourceKind::Graph,
        SourceKind::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Omi => "omi",
            SourceKind::Letta => "letta",
            SourceKind::Graph => "graph",
            SourceKind::Local => "local",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "omi" => Some(SourceKind::Omi),
            "letta" => Some(SourceKind::Letta),
            "graph" => Some(SourceKind::Graph),
            "local" => Some(SourceKind::Local),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category the oracle can probe. The first four are local full-text
/// indexes, the last two are external adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleSource {
    Screens,
    Browser,
    Git,
    Memories,
    Omi,
    Letta,
}

impl OracleSource {
    /// Discovery order: local indexes first, adapters last.
    pub const ALL: [OracleSource; 6] = [
        OracleSource::Screens,
        OracleSource::Browser,
        OracleSource::Git,
        OracleSource::Memories,
        OracleSource::Omi,
        OracleSource::Letta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OracleSource::Screens => "screens",
            OracleSource::Browser => "browser",
            OracleSource::Git => "git",
            OracleSource::Memories => "memories",
            OracleSource::Omi => "omi",
            OracleSource::Letta => "letta",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "screens" => Some(OracleSource::Screens),
            "browser" => Some(OracleSource::Browser),
            "git" => Some(OracleSource::Git),
            "memories" => Some(OracleSource::Memories),
            "omi" => Some(OracleSource::Omi),
            "letta" => Some(OracleSource::Letta),
            _ => None,
        }
    }

    pub fn is_local_index(&self) -> bool {
        matches!(
            self,
            OracleSource::Screens
                | OracleSource::Browser
                | OracleSource::Git
                | OracleSource::Memories
        )
    }
}

// =====================================================
// Domain Types
// =====================================================

/// A single normalized hit from any backend. Built per query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub source: SourceKind,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub relevance: f64,
}

/// A piece of evidence gathered by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EvidenceItem {
    /// String value of a metadata field, if present and non-empty.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn is_screen(&self) -> bool {
        self.source == "screen"
    }

    pub fn is_git(&self) -> bool {
        self.source == "git"
    }

    pub fn is_browser(&self) -> bool {
        self.source == "browser"
    }

    /// Origin of a cached memory (`memory:<origin>`), if this is one.
    pub fn memory_origin(&self) -> Option<&str> {
        self.source.strip_prefix("memory:")
    }
}

/// A memory persisted in the local cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(ActionStatus::Pending),
            "approved" => Some(ActionStatus::Approved),
            "rejected" => Some(ActionStatus::Rejected),
            _ => None,
        }
    }
}

/// A detected action awaiting human review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionQueueItem {
    pub id: i64,
    pub action_type: String,
    pub description: String,
    pub payload: Value,
    pub status: ActionStatus,
    pub priority: i64,
    pub detected_at: String,
    pub approved_at: Option<String>,
}

// =====================================================
// Captures (written by watcher processes)
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCapture {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub ocr_text: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserVisit {
    pub url: String,
    pub title: Option<String>,
    pub domain: Option<String>,
    pub browser: Option<String>,
    pub visit_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub repo: String,
    pub branch: Option<String>,
    pub sha: String,
    pub message: String,
    pub files_changed: Option<String>,
    #[serde(default)]
    pub insertions: i64,
    #[serde(default)]
    pub deletions: i64,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureRequest {
    Screen(ScreenCapture),
    Browser(BrowserVisit),
    Git(GitCommit),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub watcher_name: String,
    pub status: Option<String>,
    pub last_run: Option<String>,
    pub last_success: Option<String>,
    pub items_captured: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureCounts {
    pub screen_captures: i64,
    pub browser_entries: i64,
    pub git_commits: i64,
    pub memories: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatcherReport {
    pub watchers: Vec<WatcherStatus>,
    pub counts: CaptureCounts,
    pub database_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoActivity {
    pub commits: i64,
    pub insertions: i64,
    pub deletions: i64,
}

/// Behavioral patterns over a trailing window
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PatternReport {
    pub days_analyzed: u32,
    pub active_hours: BTreeMap<String, i64>,
    pub top_apps: BTreeMap<String, i64>,
    pub top_domains: BTreeMap<String, i64>,
    pub git_activity: BTreeMap<String, RepoActivity>,
    pub memory_categories: BTreeMap<String, i64>,
    pub generated_at: String,
}

// =====================================================
// Cache Diagnostics
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of comparing base records against the full-text index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexIntegrity {
    pub records: i64,
    pub index_entries: i64,
    pub orphaned_entries: Vec<i64>,
    pub missing_entries: Vec<i64>,
}

impl IndexIntegrity {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_entries.is_empty()
            && self.missing_entries.is_empty()
            && self.records == self.index_entries
    }
}

// =====================================================
// Health
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
    Unconfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: HealthState,
    #[serde(flatten)]
    pub detail: Metadata,
}

impl SourceHealth {
    pub fn ok(detail: Metadata) -> Self {
        Self {
            status: HealthState::Ok,
            detail,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        let mut detail = Metadata::new();
        detail.insert("error".to_string(), Value::String(msg.into()));
        Self {
            status: HealthState::Error,
            detail,
        }
    }

    pub fn unconfigured(msg: impl Into<String>) -> Self {
        let mut detail = Metadata::new();
        detail.insert("error".to_string(), Value::String(msg.into()));
        Self {
            status: HealthState::Unconfigured,
            detail,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub sources: BTreeMap<String, SourceHealth>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub endpoints: BTreeMap<String, String>,
}

// =====================================================
// RPC Request Types
// =====================================================

fn default_sources() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_limit() -> usize {
    20
}

fn default_oracle_days_back() -> Option<u32> {
    Some(7)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSearchRequest {
    pub query: String,
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub days_back: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub question: String,
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_oracle_days_back")]
    pub days_back: Option<u32>,
}

fn default_memory_source() -> String {
    "manual".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub content: String,
    #[serde(default = "default_memory_source")]
    pub source: String,
    pub category: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMemoryRequest {
    pub id: i64,
    pub content: Option<String>,
    pub category: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMemoryRequest {
    pub id: i64,
}

fn default_recent_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentMemoriesQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: i64,
}

fn default_queue_status() -> String {
    "pending".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueListQuery {
    #[serde(default = "default_queue_status")]
    pub status: String,
}

fn default_pattern_days() -> u32 {
    7
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatternQuery {
    #[serde(default = "default_pattern_days")]
    pub days_back: u32,
}

fn default_omi_memory_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OmiMemoriesQuery {
    #[serde(default = "default_omi_memory_limit")]
    pub limit: usize,
    /// Comma-separated category names.
    pub categories: Option<String>,
}

fn default_omi_conversation_limit() -> usize {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OmiConversationsQuery {
    #[serde(default = "default_omi_conversation_limit")]
    pub limit: usize,
    #[serde(default = "default_pattern_days")]
    pub days_back: u32,
}

fn default_letta_search_limit() -> usize {
    10
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LettaSearchQuery {
    pub query: String,
    #[serde(default = "default_letta_search_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSearchQuery {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphEntitiesQuery {
    /// Comma-separated entity names; absent means every entity.
    pub names: Option<String>,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<ResultRecord>,
    pub sources_queried: Vec<SourceKind>,
    pub query_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleResponse {
    pub question: String,
    pub answer: String,
    pub evidence: Vec<EvidenceItem>,
    pub sources_queried: Vec<OracleSource>,
    pub query_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub id: i64,
    pub stored_in: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueListResponse {
    pub actions: Vec<ActionQueueItem>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueTransition {
    pub status: ActionStatus,
    pub action_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_request_defaults() {
        let req: UnifiedSearchRequest = serde_json::from_str(r#"{"query": "auth"}"#).unwrap();
        assert_eq!(req.sources, vec!["all".to_string()]);
        assert_eq!(req.limit, 20);
        assert!(req.days_back.is_none());

        let req: OracleRequest = serde_json::from_str(r#"{"question": "what happened"}"#).unwrap();
        assert_eq!(req.days_back, Some(7));
    }

    #[test]
    fn test_capture_request_tagging() {
        let req: CaptureRequest = serde_json::from_str(
            r#"{"kind": "git", "repo": "/src/hub", "sha": "abc123", "message": "fix"}"#,
        )
        .unwrap();
        match req {
            CaptureRequest::Git(commit) => {
                assert_eq!(commit.repo, "/src/hub");
                assert_eq!(commit.insertions, 0);
            }
            other => panic!("unexpected capture: {:?}", other),
        }
    }

    #[test]
    fn test_source_health_flattens_detail() {
        let health = SourceHealth::unconfigured("OMI_API_KEY not set");
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "unconfigured");
        assert_eq!(json["error"], "OMI_API_KEY not set");
    }

    #[test]
    fn test_evidence_accessors() {
        let mut metadata = Metadata::new();
        metadata.insert("app".to_string(), Value::String("Zed".to_string()));
        metadata.insert("window".to_string(), Value::String(String::new()));
        let item = EvidenceItem {
            source: "memory:manual".to_string(),
            content: "x".to_string(),
            metadata,
        };
        assert_eq!(item.metadata_str("app"), Some("Zed"));
        assert_eq!(item.metadata_str("window"), None);
        assert_eq!(item.memory_origin(), Some("manual"));
        assert!(!item.is_screen());
    }
}
