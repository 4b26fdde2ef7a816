use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    config::{AnalyzerConfig, MiddlewareConfig},
    context::RequestContext,
    error::{GuardError, GuardResult},
    guard::decision::Decision,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest<'a> {
    pub context: &'a RequestContext,
    pub config: &'a MiddlewareConfig,
    pub request_history: u64,
}

/// The external service that decides what to do with a request.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(
        &self,
        request: &AnalysisRequest<'_>,
        features: &str,
    ) -> GuardResult<Decision>;
}

/// Summarises enabled features and custom rules, e.g.
/// `AUTHENTICATION | RATE_LIMITING | CUSTOM_RULES: a, b`.
pub fn feature_descriptor(config: &MiddlewareConfig) -> String {
    let mut features = Vec::new();

    if config.enable_auth {
        features.push("AUTHENTICATION".to_string());
    }
    if config.enable_rate_limit {
        features.push("RATE_LIMITING".to_string());
    }
    if config.enable_error_handling {
        features.push("ERROR_HANDLING".to_string());
    }
    if config.enable_response_transform {
        features.push("RESPONSE_TRANSFORM".to_string());
    }
    if !config.custom_rules.is_empty() {
        features.push(format!("CUSTOM_RULES: {}", config.custom_rules.join(", ")));
    }

    features.join(" | ")
}

/// Calls the analyzer with the request history and feature descriptor,
/// bounded by a timeout. Failures are returned, never retried.
pub struct AnalysisAdapter {
    analyzer: Arc<dyn Analyzer>,
    config: MiddlewareConfig,
    features: String,
    timeout: Duration,
}

impl AnalysisAdapter {
    pub fn new(analyzer: Arc<dyn Analyzer>, config: MiddlewareConfig, timeout: Duration) -> Self {
        let features = feature_descriptor(&config);
        Self {
            analyzer,
            config,
            features,
            timeout,
        }
    }

    pub async fn analyze(
        &self,
        context: &RequestContext,
        request_history: u64,
    ) -> GuardResult<Decision> {
        let request = AnalysisRequest {
            context,
            config: &self.config,
            request_history,
        };

        match tokio::time::timeout(self.timeout, self.analyzer.analyze(&request, &self.features))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    analyzer = self.analyzer.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "analysis call timed out"
                );
                Err(GuardError::AnalysisTimeout(self.timeout))
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzePayload<'a> {
    context: &'a RequestContext,
    config: &'a MiddlewareConfig,
    request_history: u64,
    features: &'a str,
}

/// Analysis service reached over HTTP: the request is POSTed as JSON and the
/// response body must be a decision object.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(cfg: &AnalyzerConfig) -> GuardResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GuardError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key: cfg.api_key.clone(),
            timeout: cfg.timeout,
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest<'_>,
        features: &str,
    ) -> GuardResult<Decision> {
        let payload = AnalyzePayload {
            context: request.context,
            config: request.config,
            request_history: request.request_history,
            features,
        };

        let mut call = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GuardError::AnalysisUnavailable(format!(
                "analysis service answered {status}"
            )));
        }

        let body = response.bytes().await?;
        Decision::from_json(&body)
    }
}
