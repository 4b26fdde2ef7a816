use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::{
    env,
    net::SocketAddr,
    time::Duration,
};

const DEFAULT_CUSTOM_RULES: &str = "Block suspicious bot traffic;\
Allow authenticated users to protected routes;\
Transform response format for mobile clients;\
Rate limit based on user tier";

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
    pub public_path_prefixes: Vec<String>,
    pub upstream: UpstreamConfig,
    pub middleware: MiddlewareConfig,
    pub cache: CacheConfig,
    pub limiter: LimiterConfig,
    pub analyzer: AnalyzerConfig,
}

/// Feature switches handed to the analysis service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareConfig {
    pub enable_auth: bool,
    pub enable_rate_limit: bool,
    pub enable_error_handling: bool,
    pub enable_response_transform: bool,
    pub custom_rules: Vec<String>,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            enable_rate_limit: true,
            enable_error_handling: true,
            enable_response_transform: true,
            custom_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            capacity: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub min_interval: Duration,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub max_tracked_origins: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            max_tracked_origins: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let upstream = UpstreamConfig {
            base_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_ms: parse_env("UPSTREAM_TIMEOUT_MS", 10_000u64).max(100),
        };
        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            return Err(anyhow!("UPSTREAM_URL must be an http(s) URL: {}", upstream.base_url));
        }

        let middleware = MiddlewareConfig {
            enable_auth: parse_env("GUARD_ENABLE_AUTH", true),
            enable_rate_limit: parse_env("GUARD_ENABLE_RATE_LIMIT", true),
            enable_error_handling: parse_env("GUARD_ENABLE_ERROR_HANDLING", true),
            enable_response_transform: parse_env("GUARD_ENABLE_RESPONSE_TRANSFORM", true),
            custom_rules: parse_list("GUARD_CUSTOM_RULES", DEFAULT_CUSTOM_RULES, ';'),
        };

        let cache = CacheConfig {
            ttl: Duration::from_secs(parse_env("DECISION_CACHE_TTL_SECS", 300u64)),
            capacity: parse_env("DECISION_CACHE_CAPACITY", 1_000usize),
        };
        if cache.capacity == 0 {
            return Err(anyhow!("DECISION_CACHE_CAPACITY must be greater than zero"));
        }

        let limiter = LimiterConfig {
            min_interval: Duration::from_millis(parse_env("ANALYSIS_MIN_INTERVAL_MS", 1_000u64)),
            stale_after: Duration::from_secs(parse_env("ANALYSIS_STALE_AFTER_SECS", 3_600u64)),
            sweep_interval: Duration::from_secs(parse_env("ANALYSIS_SWEEP_INTERVAL_SECS", 300u64)),
            max_tracked_origins: parse_env("ANALYSIS_MAX_TRACKED_ORIGINS", 10_000usize),
        };
        if limiter.sweep_interval.is_zero() {
            return Err(anyhow!("ANALYSIS_SWEEP_INTERVAL_SECS must be greater than zero"));
        }

        let analyzer = AnalyzerConfig {
            endpoint: env::var("ANALYZER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9100/v1/analyze".to_string()),
            api_key: env::var("ANALYZER_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: Duration::from_millis(parse_env("ANALYZER_TIMEOUT_MS", 2_500u64).max(1)),
        };

        Ok(Self {
            bind_addr,
            max_body_bytes: parse_env("MAX_BODY_BYTES", 1_048_576usize),
            public_path_prefixes: parse_list(
                "PUBLIC_PATHS",
                "/api/v1/auth,/_next/static,/_next/image,/favicon.ico,/health",
                ',',
            ),
            upstream,
            middleware,
            cache,
            limiter,
            analyzer,
        })
    }
}

#[cfg(test)]
impl GuardConfig {
    pub(crate) fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_body_bytes: 1_048_576,
            public_path_prefixes: Vec::new(),
            upstream: UpstreamConfig {
                base_url: "http://127.0.0.1:3000".to_string(),
                timeout_ms: 1_000,
            },
            middleware: MiddlewareConfig::default(),
            cache: CacheConfig::default(),
            limiter: LimiterConfig::default(),
            analyzer: AnalyzerConfig {
                endpoint: "http://127.0.0.1:9100/v1/analyze".to_string(),
                api_key: None,
                timeout: Duration::from_millis(2_500),
            },
        }
    }
}

fn parse_list(key: &str, default: &str, separator: char) -> Vec<String> {
    split_list(&env::var(key).unwrap_or_else(|_| default.to_string()), separator)
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_CUSTOM_RULES, split_list};

    #[test]
    fn default_rules_split_on_semicolons() {
        let rules = split_list(DEFAULT_CUSTOM_RULES, ';');
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], "Block suspicious bot traffic");
        assert_eq!(rules[3], "Rate limit based on user tier");
    }

    #[test]
    fn blank_list_entries_are_dropped() {
        assert_eq!(split_list(" /a, ,/b ,", ','), vec!["/a", "/b"]);
    }
}
