//! Environment-driven configuration for the memory hub.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8100;
const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 5000;
const DEFAULT_OMI_API_BASE: &str = "https://api.omi.me/v1";
const DEFAULT_LETTA_API_BASE: &str = "https://api.letta.com";

/// Probe sizing for the oracle. The divisors split the request limit into
/// per-keyword and per-adapter shares so no single probe dominates.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub keyword_divisor: usize,
    pub adapter_divisor: usize,
    pub max_keywords: usize,
    pub content_chars: usize,
    pub dedup_prefix_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            keyword_divisor: 3,
            adapter_divisor: 2,
            max_keywords: 3,
            content_chars: 500,
            dedup_prefix_chars: 100,
        }
    }
}

impl OracleConfig {
    /// Cap for one local index probe (one keyword, one category).
    pub fn per_keyword_limit(&self, limit: usize) -> usize {
        (limit / self.keyword_divisor.max(1)).max(1)
    }

    /// Cap for one external adapter search.
    pub fn per_adapter_limit(&self, limit: usize) -> usize {
        (limit / self.adapter_divisor.max(1)).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct OmiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LettaConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    pub db_path: String,
    pub adapter_timeout: Duration,
    pub omi: OmiConfig,
    pub letta: LettaConfig,
    pub graph_path: PathBuf,
    pub oracle: OracleConfig,
}

impl HubConfig {
    pub fn from_env() -> Self {
        let home = env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
        let oracle_defaults = OracleConfig::default();

        Self {
            bind: env::var("MEMORY_HUB_BIND").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("MEMORY_HUB_PORT", DEFAULT_PORT),
            db_path: env::var("MEMORY_HUB_DB_PATH").unwrap_or_else(|_| {
                home.join(".sigserve")
                    .join("memory.db")
                    .to_string_lossy()
                    .into_owned()
            }),
            adapter_timeout: Duration::from_millis(parse_var(
                "MEMORY_HUB_ADAPTER_TIMEOUT_MS",
                DEFAULT_ADAPTER_TIMEOUT_MS,
            )),
            omi: OmiConfig {
                api_base: env::var("OMI_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_OMI_API_BASE.to_string()),
                api_key: non_empty_var("OMI_API_KEY"),
            },
            letta: LettaConfig {
                api_base: env::var("LETTA_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_LETTA_API_BASE.to_string()),
                api_key: non_empty_var("LETTA_API_KEY"),
                agent_id: non_empty_var("LETTA_AGENT_ID"),
            },
            graph_path: env::var("KNOWLEDGE_GRAPH_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".claude").join("memory").join("graph.json")),
            oracle: OracleConfig {
                keyword_divisor: parse_var("ORACLE_KEYWORD_DIVISOR", oracle_defaults.keyword_divisor),
                adapter_divisor: parse_var("ORACLE_ADAPTER_DIVISOR", oracle_defaults.adapter_divisor),
                max_keywords: parse_var("ORACLE_MAX_KEYWORDS", oracle_defaults.max_keywords),
                ..oracle_defaults
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!(
                "[MEMORY_HUB] Invalid value {:?} for {}, using {}",
                raw,
                key,
                default
            );
            default
        }),
        Err(_) => default,
    }
}
