use reqwest::Client;
use std::time::Duration;

/// Build the HTTP client shared by the remote adapters.
///
/// `Client::clone()` is an `Arc` increment, so every adapter gets a clone of
/// the same pool. Per-call deadlines are applied by the adapters themselves.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(timeout)
        .build()
}
