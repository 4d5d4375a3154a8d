//! Memory Hub Service: unified search and question answering over personal
//! memory stores.
//!
//! Default: http://127.0.0.1:8100/

mod config;
mod db;
mod error;
mod fanout;
mod http;
mod oracle;
mod ranking;
mod routes;
mod sources;

use config::HubConfig;
use fanout::FanOut;
use oracle::Oracle;
use routes::AppState;
use sources::graph::GraphSource;
use sources::letta::LettaSource;
use sources::local::LocalSource;
use sources::omi::OmiSource;
use sources::SourceRegistry;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = HubConfig::from_env();

    log::info!("[MEMORY_HUB] Opening database at: {}", config.db_path);
    let database = match db::Db::open(&config.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("[MEMORY_HUB] Failed to open database {}: {}", config.db_path, e);
            std::process::exit(1);
        }
    };

    let client = match http::build_client(config.adapter_timeout) {
        Ok(client) => client,
        Err(e) => {
            log::error!("[MEMORY_HUB] Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let omi = Arc::new(OmiSource::new(config.omi.clone(), client.clone()));
    if !omi.is_configured() {
        log::warn!("[MEMORY_HUB] OMI_API_KEY not set, Omi search and mirroring disabled");
    }
    if config.letta.api_key.is_none() || config.letta.agent_id.is_none() {
        log::warn!("[MEMORY_HUB] Letta credentials incomplete, Letta search disabled");
    }

    let letta = Arc::new(LettaSource::new(config.letta.clone(), client));
    let graph = Arc::new(GraphSource::new(config.graph_path.clone()));

    let registry = SourceRegistry::new()
        .with(omi.clone())
        .with(letta.clone())
        .with(graph.clone())
        .with(Arc::new(LocalSource::new(database.clone())));
    let fanout = FanOut::new(registry, config.adapter_timeout);
    let oracle = Oracle::new(database.clone(), fanout.clone(), config.oracle.clone());

    let state = Arc::new(AppState {
        db: database,
        fanout,
        oracle,
        omi,
        letta,
        graph,
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();
    let app = routes::build_router(state).layer(cors);

    let addr = config.listen_addr();
    log::info!("[MEMORY_HUB] Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("[MEMORY_HUB] Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("[MEMORY_HUB] Server error: {}", e);
        std::process::exit(1);
    }
}
