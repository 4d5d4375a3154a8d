//! Concurrent fan-out over the registered sources.
//!
//! One call per resolved source, all issued together and each bounded by the
//! adapter timeout. A source that fails or times out contributes nothing; the
//! response is still well-formed and lists every source that was asked.

use chrono::{SecondsFormat, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use memory_hub_types::{
    HealthReport, HealthState, ResultRecord, SourceHealth, SourceKind, UnifiedResponse,
    UnifiedSearchRequest,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use crate::error::{HubError, HubResult};
use crate::ranking::{normalize, rank};
use crate::sources::{MemorySource, RawHit, SourceRegistry};

#[derive(Clone)]
pub struct FanOut {
    registry: SourceRegistry,
    timeout: Duration,
}

impl FanOut {
    pub fn new(registry: SourceRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn unified_search(&self, request: &UnifiedSearchRequest) -> UnifiedResponse {
        let started = Instant::now();
        let sources = self.registry.resolve(&request.sources);
        let sources_queried: Vec<SourceKind> = sources.iter().map(|s| s.kind()).collect();

        let calls = sources.iter().map(|source| {
            let source = source.as_ref();
            async move {
                let kind = source.kind();
                match bounded_search(source, &request.query, request.limit, request.days_back, self.timeout)
                    .await
                {
                    Ok(hits) => hits
                        .into_iter()
                        .map(|hit| normalize(kind, hit))
                        .collect::<Vec<ResultRecord>>(),
                    Err(e) => {
                        log::warn!("[FANOUT] {} contributed nothing: {}", kind, e);
                        Vec::new()
                    }
                }
            }
        });
        let collected: Vec<ResultRecord> = join_all(calls).await.into_iter().flatten().collect();

        let results = rank(collected, request.limit);
        let query_time_ms = elapsed_ms(started);
        log::debug!(
            "[FANOUT] {:?}: {} results from {:?} in {:.2}ms",
            request.query,
            results.len(),
            sources_queried,
            query_time_ms
        );

        UnifiedResponse {
            query: request.query.clone(),
            total_results: results.len(),
            results,
            sources_queried,
            query_time_ms,
        }
    }

    /// Health of every registered source; `healthy` only when all are ok.
    pub async fn health(&self) -> HealthReport {
        let kinds = self.registry.kinds();
        let checks = kinds.iter().filter_map(|kind| self.registry.get(*kind)).map(|source| {
            let timeout = self.timeout;
            async move {
                let kind = source.kind();
                let check = AssertUnwindSafe(source.health()).catch_unwind();
                let health = match tokio::time::timeout(timeout, check).await {
                    Ok(Ok(health)) => health,
                    Ok(Err(panic)) => SourceHealth::error(format!(
                        "health check panicked: {}",
                        panic_message(panic.as_ref())
                    )),
                    Err(_) => SourceHealth::error(format!(
                        "health check timed out after {}ms",
                        timeout.as_millis()
                    )),
                };
                (kind.as_str().to_string(), health)
            }
        });
        let sources: BTreeMap<String, SourceHealth> = join_all(checks).await.into_iter().collect();

        let all_ok = sources.values().all(|h| h.status == HealthState::Ok);
        HealthReport {
            status: if all_ok { "healthy" } else { "degraded" }.to_string(),
            sources,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// One adapter search with a deadline. Expiry and panics are reported like
/// any other backend failure.
pub async fn bounded_search(
    source: &dyn MemorySource,
    query: &str,
    limit: usize,
    days_back: Option<u32>,
    timeout: Duration,
) -> HubResult<Vec<RawHit>> {
    let call = AssertUnwindSafe(source.search(query, limit, days_back)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(HubError::unavailable(
            source.kind().as_str(),
            format!("search panicked: {}", panic_message(panic.as_ref())),
        )),
        Err(_) => Err(HubError::unavailable(
            source.kind().as_str(),
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Milliseconds rounded to two decimals.
pub fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}
