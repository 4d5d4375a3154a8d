//! Axum route handlers for the memory hub API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use memory_hub_types::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::db::Db;
use crate::error::{HubError, HubResult};
use crate::fanout::{bounded_search, FanOut};
use crate::oracle::Oracle;
use crate::ranking::normalize;
use crate::sources::graph::{Entity, GraphSource};
use crate::sources::letta::{LettaSource, MemoryBlock};
use crate::sources::omi::{OmiConversation, OmiMemory, OmiSource};
use crate::sources::MemorySource;

const EPHEMERAL_CATEGORY: &str = "ephemeral";
const OMI_MEMORY_LIMIT_MAX: usize = 100;
const OMI_CONVERSATION_LIMIT_MAX: usize = 50;
const OMI_CONVERSATION_DAYS_MAX: u32 = 30;
const LETTA_SEARCH_LIMIT_MAX: usize = 50;
const GRAPH_SEARCH_LIMIT: usize = 20;

pub struct AppState {
    pub db: Arc<Db>,
    pub fanout: FanOut,
    pub oracle: Oracle,
    pub omi: Arc<OmiSource>,
    pub letta: Arc<LettaSource>,
    pub graph: Arc<GraphSource>,
    pub start_time: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        // Search & query
        .route("/search", post(unified_search))
        .route("/oracle", post(ask_oracle))
        .route("/patterns", get(patterns))
        // Sources
        .route("/sources", get(list_sources))
        .route("/health", get(health))
        // Per-source browsing
        .route("/omi/memories", get(omi_memories))
        .route("/omi/conversations", get(omi_conversations))
        .route("/letta/memories", get(letta_memories))
        .route("/letta/search", get(letta_search))
        .route("/graph/search", get(graph_search))
        .route("/graph/entities", get(graph_entities))
        // Memories
        .route("/ingest", post(ingest))
        .route("/memories/recent", get(memories_recent))
        .route("/memories/update", post(memories_update))
        .route("/memories/delete", post(memories_delete))
        .route("/memories/verify", get(memories_verify))
        .route("/memories/reindex", post(memories_reindex))
        .route("/memories/:id", get(memories_get))
        // Watchers
        .route("/capture", post(capture))
        .route("/watcher/status", get(watcher_status))
        // Action queue
        .route("/queue", get(queue_list).post(queue_enqueue))
        .route("/queue/:id", get(queue_get))
        .route("/queue/:id/approve", post(queue_approve))
        .route("/queue/:id/reject", post(queue_reject))
        .with_state(state)
}

/// Run blocking SQLite work off the async executor.
async fn with_db<T, F>(state: &AppState, f: F) -> HubResult<T>
where
    F: FnOnce(&Db) -> HubResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(&state.db);
    tokio::task::spawn_blocking(move || f(&db)).await?
}

fn reply<T: Serialize>(result: HubResult<T>, action: &str) -> (StatusCode, Json<RpcResponse<T>>) {
    match result {
        Ok(data) => (StatusCode::OK, Json(RpcResponse::ok(data))),
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                log::error!("[MEMORY_HUB] {} failed: {}", action, e);
            }
            (status, Json(RpcResponse::err(format!("{}: {}", action, e))))
        }
    }
}

fn bad_request<T: Serialize>(msg: &str) -> (StatusCode, Json<RpcResponse<T>>) {
    (StatusCode::BAD_REQUEST, Json(RpcResponse::err(msg)))
}

// =====================================================
// Service Endpoints
// =====================================================

// GET /
pub async fn service_info(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    let endpoints: BTreeMap<String, String> = [
        ("/search", "Unified search across all sources"),
        ("/oracle", "Natural language questions about captured activity"),
        ("/patterns", "Behavioral pattern analysis"),
        ("/sources", "List available memory sources"),
        ("/health", "Health check"),
        ("/omi/memories", "Browse Omi memories"),
        ("/omi/conversations", "Browse recent Omi conversations"),
        ("/letta/memories", "Letta agent memory blocks"),
        ("/letta/search", "Search Letta history"),
        ("/graph/search", "Search the knowledge graph"),
        ("/graph/entities", "Knowledge graph entities by name"),
        ("/ingest", "Ingest a new memory"),
        ("/memories/recent", "Most recent cached memories"),
        ("/memories/update", "Edit a cached memory"),
        ("/memories/delete", "Delete a cached memory"),
        ("/memories/verify", "Check the full-text index against stored memories"),
        ("/memories/reindex", "Rebuild the full-text index"),
        ("/memories/:id", "One cached memory"),
        ("/capture", "Record a screen, browser or git capture"),
        ("/watcher/status", "Watcher status and capture counts"),
        ("/queue", "List or enqueue actions"),
        ("/queue/:id", "One action"),
        ("/queue/:id/approve", "Approve an action"),
        ("/queue/:id/reject", "Reject an action"),
    ]
    .into_iter()
    .map(|(path, desc)| (path.to_string(), desc.to_string()))
    .collect();

    Json(ServiceInfo {
        service: "memory-hub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        endpoints,
    })
}

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.fanout.health().await)
}

// GET /sources
pub async fn list_sources() -> Json<Vec<SourceInfo>> {
    let catalog = [
        (
            SourceKind::Omi,
            "Omi pendant - conversations and extracted memories",
            &["conversations", "memories", "search"][..],
        ),
        (
            SourceKind::Letta,
            "Letta agents - cross-session context and memory blocks",
            &["memories", "search", "agents"][..],
        ),
        (
            SourceKind::Graph,
            "Knowledge graph - entities and relationships",
            &["entities", "relations", "search"][..],
        ),
        (
            SourceKind::Local,
            "Local SQLite - fast cache with full-text search",
            &["cache", "fts", "search"][..],
        ),
    ];
    Json(
        catalog
            .into_iter()
            .map(|(kind, description, capabilities)| SourceInfo {
                name: kind.as_str().to_string(),
                description: description.to_string(),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            })
            .collect(),
    )
}

// =====================================================
// Search Endpoints
// =====================================================

// POST /search
pub async fn unified_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnifiedSearchRequest>,
) -> (StatusCode, Json<RpcResponse<UnifiedResponse>>) {
    if req.query.trim().is_empty() {
        return bad_request("query must not be empty");
    }
    let response = state.fanout.unified_search(&req).await;
    (StatusCode::OK, Json(RpcResponse::ok(response)))
}

// POST /oracle
pub async fn ask_oracle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OracleRequest>,
) -> (StatusCode, Json<RpcResponse<OracleResponse>>) {
    if req.question.trim().is_empty() {
        return bad_request("question must not be empty");
    }
    let response = state.oracle.ask(&req).await;
    (StatusCode::OK, Json(RpcResponse::ok(response)))
}

// GET /patterns
pub async fn patterns(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PatternQuery>,
) -> (StatusCode, Json<RpcResponse<PatternReport>>) {
    let days_back = query.days_back;
    let result = with_db(&state, move |db| Ok(db.analyze_patterns(days_back))).await;
    reply(result, "Failed to analyze patterns")
}

// =====================================================
// Per-Source Endpoints
// =====================================================

/// Comma-separated names, blanks dropped.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// A single adapter search with the fan-out's deadline, normalized.
async fn search_one(
    state: &AppState,
    source: &dyn MemorySource,
    query: &str,
    limit: usize,
) -> HubResult<Vec<ResultRecord>> {
    if query.trim().is_empty() {
        return Err(HubError::Validation("query must not be empty".to_string()));
    }
    let kind = source.kind();
    let hits = bounded_search(source, query, limit, None, state.fanout.timeout()).await?;
    Ok(hits.into_iter().map(|hit| normalize(kind, hit)).collect())
}

// GET /omi/memories
pub async fn omi_memories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OmiMemoriesQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<OmiMemory>>>) {
    if query.limit > OMI_MEMORY_LIMIT_MAX {
        return bad_request(&format!("limit must be at most {}", OMI_MEMORY_LIMIT_MAX));
    }
    let categories = split_list(query.categories.as_deref());
    let result = state.omi.get_memories(query.limit, &categories).await;
    reply(result, "Failed to fetch Omi memories")
}

// GET /omi/conversations
pub async fn omi_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OmiConversationsQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<OmiConversation>>>) {
    if query.limit > OMI_CONVERSATION_LIMIT_MAX {
        return bad_request(&format!("limit must be at most {}", OMI_CONVERSATION_LIMIT_MAX));
    }
    if query.days_back > OMI_CONVERSATION_DAYS_MAX {
        return bad_request(&format!("days_back must be at most {}", OMI_CONVERSATION_DAYS_MAX));
    }
    let result = state.omi.get_conversations(query.limit, query.days_back).await;
    reply(result, "Failed to fetch Omi conversations")
}

// GET /letta/memories
pub async fn letta_memories(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<Vec<MemoryBlock>>>) {
    reply(state.letta.get_memories().await, "Failed to fetch Letta memories")
}

// GET /letta/search
pub async fn letta_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LettaSearchQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<ResultRecord>>>) {
    if query.limit > LETTA_SEARCH_LIMIT_MAX {
        return bad_request(&format!("limit must be at most {}", LETTA_SEARCH_LIMIT_MAX));
    }
    let result = search_one(&state, state.letta.as_ref(), &query.query, query.limit).await;
    reply(result, "Failed to search Letta")
}

// GET /graph/search
pub async fn graph_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GraphSearchQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<ResultRecord>>>) {
    let result = search_one(&state, state.graph.as_ref(), &query.query, GRAPH_SEARCH_LIMIT).await;
    reply(result, "Failed to search knowledge graph")
}

// GET /graph/entities
pub async fn graph_entities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GraphEntitiesQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<Entity>>>) {
    let names = split_list(query.names.as_deref());
    reply(state.graph.get_entities(&names).await, "Failed to load entities")
}

// =====================================================
// Memory Endpoints
// =====================================================

// POST /ingest
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<RpcResponse<IngestResponse>>) {
    let IngestRequest {
        content,
        source,
        category,
        metadata,
    } = req;

    let stored = {
        let content = content.clone();
        let category = category.clone();
        with_db(&state, move |db| {
            db.store_memory(&content, &source, category.as_deref(), &metadata)
        })
        .await
    };
    let id = match stored {
        Ok(id) => id,
        Err(e) => return reply(Err(e), "Failed to store memory"),
    };

    let mut stored_in = vec!["local".to_string()];
    if let Some(category) = category.filter(|c| c != EPHEMERAL_CATEGORY) {
        if state.omi.is_configured() {
            stored_in.push("omi".to_string());
            let omi = Arc::clone(&state.omi);
            tokio::spawn(async move {
                if let Err(e) = omi.create_memory(&content, &category).await {
                    log::warn!("[OMI] Mirror of memory #{} failed: {}", id, e);
                }
            });
        }
    }

    log::info!("[MEMORY_HUB] Ingested memory #{} into {:?}", id, stored_in);
    (
        StatusCode::OK,
        Json(RpcResponse::ok(IngestResponse {
            status: "stored".to_string(),
            id,
            stored_in,
        })),
    )
}

// GET /memories/recent
pub async fn memories_recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentMemoriesQuery>,
) -> (StatusCode, Json<RpcResponse<Vec<MemoryRecord>>>) {
    let result = with_db(&state, move |db| {
        db.get_recent_memories(query.limit, query.source.as_deref())
    })
    .await;
    reply(result, "Failed to list memories")
}

// GET /memories/:id
pub async fn memories_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<RpcResponse<MemoryRecord>>) {
    let result = with_db(&state, move |db| {
        db.get_memory(id)?
            .ok_or_else(|| HubError::NotFound(format!("memory #{}", id)))
    })
    .await;
    reply(result, "Failed to get memory")
}

// POST /memories/update
pub async fn memories_update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateMemoryRequest>,
) -> (StatusCode, Json<RpcResponse<MemoryRecord>>) {
    let result = with_db(&state, move |db| {
        db.update_memory(
            req.id,
            req.content.as_deref(),
            req.category.as_deref(),
            req.metadata.as_ref(),
        )
    })
    .await;
    reply(result, "Failed to update memory")
}

// POST /memories/delete
pub async fn memories_delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteMemoryRequest>,
) -> (StatusCode, Json<RpcResponse<bool>>) {
    let result = with_db(&state, move |db| db.delete_memory(req.id)).await;
    reply(result, "Failed to delete memory")
}

// GET /memories/verify
pub async fn memories_verify(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<IndexIntegrity>>) {
    let result = with_db(&state, |db| db.verify_index()).await;
    if let Ok(integrity) = &result {
        if !integrity.is_consistent() {
            log::warn!(
                "[CACHE] Index drift: {} orphaned, {} missing",
                integrity.orphaned_entries.len(),
                integrity.missing_entries.len()
            );
        }
    }
    reply(result, "Failed to verify index")
}

// POST /memories/reindex
pub async fn memories_reindex(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<usize>>) {
    let result = with_db(&state, |db| db.rebuild_index()).await;
    reply(result, "Failed to rebuild index")
}

// =====================================================
// Watcher Endpoints
// =====================================================

// POST /capture
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CaptureRequest>,
) -> (StatusCode, Json<RpcResponse<i64>>) {
    let result = with_db(&state, move |db| db.insert_capture(&req)).await;
    reply(result, "Failed to record capture")
}

// GET /watcher/status
pub async fn watcher_status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<WatcherReport>>) {
    let result = with_db(&state, |db| db.watcher_report()).await;
    reply(result, "Failed to read watcher status")
}

// =====================================================
// Action Queue Endpoints
// =====================================================

// GET /queue
pub async fn queue_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueListQuery>,
) -> (StatusCode, Json<RpcResponse<QueueListResponse>>) {
    let Some(status) = ActionStatus::from_name(&query.status) else {
        return bad_request("status must be one of pending, approved, rejected");
    };
    let result = with_db(&state, move |db| db.list_actions(status))
        .await
        .map(|actions| QueueListResponse {
            count: actions.len(),
            actions,
        });
    reply(result, "Failed to list actions")
}

// POST /queue
pub async fn queue_enqueue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnqueueActionRequest>,
) -> (StatusCode, Json<RpcResponse<ActionQueueItem>>) {
    let result = with_db(&state, move |db| {
        let id = db.enqueue_action(&req.action_type, &req.description, &req.payload, req.priority)?;
        db.get_action(id)?
            .ok_or_else(|| HubError::Internal(format!("action #{} vanished after insert", id)))
    })
    .await;
    reply(result, "Failed to enqueue action")
}

// GET /queue/:id
pub async fn queue_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<RpcResponse<ActionQueueItem>>) {
    let result = with_db(&state, move |db| {
        db.get_action(id)?
            .ok_or_else(|| HubError::NotFound(format!("action #{}", id)))
    })
    .await;
    reply(result, "Failed to get action")
}

// POST /queue/:id/approve
pub async fn queue_approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<RpcResponse<QueueTransition>>) {
    let result = with_db(&state, move |db| db.approve_action(id))
        .await
        .map(|_| QueueTransition {
            status: ActionStatus::Approved,
            action_id: id,
        });
    reply(result, "Failed to approve action")
}

// POST /queue/:id/reject
pub async fn queue_reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<RpcResponse<QueueTransition>>) {
    let result = with_db(&state, move |db| db.reject_action(id))
        .await
        .map(|_| QueueTransition {
            status: ActionStatus::Rejected,
            action_id: id,
        });
    reply(result, "Failed to reject action")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LettaConfig, OmiConfig, OracleConfig};
    use crate::sources::local::LocalSource;
    use crate::sources::SourceRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn state_with_graph(graph_path: &std::path::Path) -> Arc<AppState> {
        let db = Arc::new(Db::open(":memory:").unwrap());
        let registry = SourceRegistry::new().with(Arc::new(LocalSource::new(Arc::clone(&db))));
        let fanout = FanOut::new(registry, Duration::from_secs(1));
        let oracle = Oracle::new(Arc::clone(&db), fanout.clone(), OracleConfig::default());
        let omi = Arc::new(OmiSource::new(
            OmiConfig {
                api_base: "http://127.0.0.1:9".to_string(),
                api_key: None,
            },
            reqwest::Client::new(),
        ));
        let letta = Arc::new(LettaSource::new(
            LettaConfig {
                api_base: "http://127.0.0.1:9".to_string(),
                api_key: None,
                agent_id: None,
            },
            reqwest::Client::new(),
        ));
        let graph = Arc::new(GraphSource::new(graph_path.to_path_buf()));
        Arc::new(AppState {
            db,
            fanout,
            oracle,
            omi,
            letta,
            graph,
            start_time: Instant::now(),
        })
    }

    fn state() -> Arc<AppState> {
        state_with_graph(std::path::Path::new("/nonexistent/memory-hub/graph.json"))
    }

    fn ingest_request(content: &str, category: Option<&str>) -> IngestRequest {
        serde_json::from_value(json!({"content": content, "category": category})).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let state = state();
        let (status, Json(resp)) = ingest(
            State(Arc::clone(&state)),
            Json(ingest_request("Discussed auth rollout with Sam", Some("meeting"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored = resp.data.unwrap();
        assert_eq!(stored.stored_in, vec!["local"]);

        let req: UnifiedSearchRequest = serde_json::from_value(json!({"query": "auth"})).unwrap();
        let (status, Json(resp)) = unified_search(State(state), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        let data = resp.data.unwrap();
        assert_eq!(data.total_results, 1);
        assert_eq!(data.sources_queried, vec![SourceKind::Local]);
        assert_eq!(data.results[0].metadata["id"], stored.id);
    }

    #[tokio::test]
    async fn test_empty_content_is_bad_request() {
        let (status, Json(resp)) =
            ingest(State(state()), Json(ingest_request("  ", None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("content must not be empty"));
    }

    #[tokio::test]
    async fn test_queue_approve_twice_is_not_found() {
        let state = state();
        let req: EnqueueActionRequest =
            serde_json::from_value(json!({"action_type": "follow_up", "description": "Ping Sam"}))
                .unwrap();
        let (status, Json(resp)) = queue_enqueue(State(Arc::clone(&state)), Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        let queued = resp.data.unwrap();
        assert_eq!(queued.status, ActionStatus::Pending);
        let id = queued.id;

        let (status, Json(resp)) = queue_approve(State(Arc::clone(&state)), Path(id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.data.unwrap().status, ActionStatus::Approved);

        let (status, _) = queue_approve(State(Arc::clone(&state)), Path(id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, Json(resp)) = queue_get(State(Arc::clone(&state)), Path(id)).await;
        assert!(resp.data.unwrap().approved_at.is_some());

        let query = QueueListQuery {
            status: "approved".to_string(),
        };
        let (_, Json(resp)) = queue_list(State(state), Query(query)).await;
        assert_eq!(resp.data.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_queue_rejects_unknown_status() {
        let query = QueueListQuery {
            status: "archived".to_string(),
        };
        let (status, _) = queue_list(State(state()), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_missing_memory_is_not_found() {
        let req = UpdateMemoryRequest {
            id: 12,
            content: Some("new".to_string()),
            category: None,
            metadata: None,
        };
        let state = state();
        let (status, _) = memories_update(State(Arc::clone(&state)), Json(req)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = memories_get(State(state), Path(12)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_browse_limits_are_capped() {
        let state = state();

        let query = OmiMemoriesQuery {
            limit: 101,
            categories: None,
        };
        let (status, _) = omi_memories(State(Arc::clone(&state)), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let query = OmiConversationsQuery {
            limit: 10,
            days_back: 31,
        };
        let (status, _) = omi_conversations(State(Arc::clone(&state)), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let query = LettaSearchQuery {
            query: "auth".to_string(),
            limit: 51,
        };
        let (status, _) = letta_search(State(state), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unconfigured_backends_are_unavailable() {
        let state = state();

        let query = OmiMemoriesQuery {
            limit: 10,
            categories: Some("work,ideas".to_string()),
        };
        let (status, Json(resp)) = omi_memories(State(Arc::clone(&state)), Query(query)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!resp.success);

        let (status, _) = letta_memories(State(Arc::clone(&state))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let query = LettaSearchQuery {
            query: "auth".to_string(),
            limit: 10,
        };
        let (status, Json(resp)) = letta_search(State(state), Query(query)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(resp.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graph_browse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(
            &path,
            r#"{"entities": [
                {"name": "Sam", "entityType": "person", "observations": ["Owns the auth rollout"]},
                {"name": "Billing", "entityType": "system", "observations": []}
            ], "relations": []}"#,
        )
        .unwrap();
        let state = state_with_graph(&path);

        let query = GraphEntitiesQuery {
            names: Some("Sam, Nobody".to_string()),
        };
        let (status, Json(resp)) = graph_entities(State(Arc::clone(&state)), Query(query)).await;
        assert_eq!(status, StatusCode::OK);
        let entities = resp.data.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Sam");

        let query = GraphSearchQuery {
            query: "auth".to_string(),
        };
        let (status, Json(resp)) = graph_search(State(Arc::clone(&state)), Query(query)).await;
        assert_eq!(status, StatusCode::OK);
        let results = resp.data.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, SourceKind::Graph);
        assert_eq!(results[0].content, "Sam: Owns the auth rollout");

        let query = GraphSearchQuery {
            query: "  ".to_string(),
        };
        let (status, _) = graph_search(State(state), Query(query)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oracle_requires_question() {
        let req: OracleRequest = serde_json::from_value(json!({"question": " "})).unwrap();
        let (status, _) = ask_oracle(State(state()), Json(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
