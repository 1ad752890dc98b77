// Server configuration
//
// Everything comes from the environment (dotenv loaded by main). Limits
// default to values that keep a single instance healthy; all of them are
// overridable per deployment.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(name, default_ms))
}

/// Per-limiter admission settings
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub concurrency: usize,
    pub queue_size: usize,
    pub queue_timeout: Duration,
}

/// Full server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub plugins_dir: String,

    /// Accepted bearer tokens; empty disables auth
    pub api_keys: Vec<String>,
    /// Trust X-Forwarded-For for the rate-limit key
    pub trust_proxy_headers: bool,

    /// Token bucket: sustained requests per second and burst capacity
    pub rate_limit_rps: f64,
    pub rate_limit_burst: f64,

    pub max_body_bytes: usize,
    pub body_read_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,

    pub llm_run: AdmissionConfig,
    pub llm_stream: AdmissionConfig,
    pub vector_run: AdmissionConfig,
    pub vector_stream: AdmissionConfig,
    pub embedding_run: AdmissionConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let queue_size = env_parse("RELAY_ADMISSION_QUEUE_SIZE", 32usize);
        let queue_timeout = env_millis("RELAY_ADMISSION_QUEUE_TIMEOUT_MS", 10_000);
        let admission = |name: &str, default_concurrency: usize| AdmissionConfig {
            concurrency: env_parse(name, default_concurrency),
            queue_size,
            queue_timeout,
        };

        let api_keys = std::env::var("RELAY_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            addr: std::env::var("RELAY_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            plugins_dir: std::env::var("RELAY_PLUGINS_DIR")
                .unwrap_or_else(|_| "plugins".to_string()),
            api_keys,
            trust_proxy_headers: std::env::var("RELAY_TRUST_PROXY_HEADERS").as_deref() == Ok("1"),
            rate_limit_rps: env_parse("RELAY_RATE_LIMIT_RPS", 20.0),
            rate_limit_burst: env_parse("RELAY_RATE_LIMIT_BURST", 40.0),
            max_body_bytes: env_parse("RELAY_MAX_BODY_BYTES", 2_000_000usize),
            body_read_timeout: env_millis("RELAY_BODY_READ_TIMEOUT_MS", 10_000),
            request_timeout: env_millis("RELAY_REQUEST_TIMEOUT_MS", 120_000),
            stream_idle_timeout: env_millis("RELAY_STREAM_IDLE_TIMEOUT_MS", 30_000),
            llm_run: admission("RELAY_LLM_RUN_CONCURRENCY", 8),
            llm_stream: admission("RELAY_LLM_STREAM_CONCURRENCY", 8),
            vector_run: admission("RELAY_VECTOR_RUN_CONCURRENCY", 16),
            vector_stream: admission("RELAY_VECTOR_STREAM_CONCURRENCY", 16),
            embedding_run: admission("RELAY_EMBEDDING_RUN_CONCURRENCY", 16),
        }
    }

    /// Defaults suitable for tests (no env reads)
    pub fn for_tests() -> Self {
        let admission = AdmissionConfig {
            concurrency: 4,
            queue_size: 4,
            queue_timeout: Duration::from_millis(500),
        };
        Self {
            addr: "127.0.0.1:0".to_string(),
            plugins_dir: "plugins".to_string(),
            api_keys: Vec::new(),
            trust_proxy_headers: false,
            rate_limit_rps: 1_000.0,
            rate_limit_burst: 1_000.0,
            max_body_bytes: 1_000_000,
            body_read_timeout: Duration::from_millis(2_000),
            request_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(10),
            llm_run: admission,
            llm_stream: admission,
            vector_run: admission,
            vector_stream: admission,
            embedding_run: admission,
        }
    }
}
