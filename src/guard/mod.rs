pub mod analysis;
pub mod cache;
pub mod decision;
pub mod dispatch;
pub mod heuristic;
pub mod limiter;

use std::{sync::Arc, time::Instant};

use tokio::task::JoinError;

use crate::{
    config::GuardConfig,
    context::{InboundRequest, RequestContext},
    error::{GuardError, GuardResult},
    guard::{
        analysis::{AnalysisAdapter, Analyzer},
        cache::{DecisionCache, cache_key},
        decision::Decision,
        dispatch::{ControlFlow, DecisionSource, dispatch, error_response},
        heuristic::FallbackHeuristic,
        limiter::AnalysisRateLimiter,
    },
};

struct EngineInner {
    cache: DecisionCache,
    limiter: AnalysisRateLimiter,
    heuristic: FallbackHeuristic,
    analysis: AnalysisAdapter,
}

/// Per-request decision pipeline: cache, then either the fallback rules (when
/// the origin is rate limited) or the analysis service.
///
/// Built once at startup and shared by every handler; `shutdown` must be
/// called before the process exits.
#[derive(Clone)]
pub struct GuardEngine {
    inner: Arc<EngineInner>,
}

impl GuardEngine {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &GuardConfig, analyzer: Arc<dyn Analyzer>) -> GuardResult<Self> {
        let heuristic = FallbackHeuristic::new()
            .map_err(|e| GuardError::Internal(format!("invalid fallback pattern: {e}")))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                cache: DecisionCache::new(&config.cache),
                limiter: AnalysisRateLimiter::new(config.limiter.clone()),
                heuristic,
                analysis: AnalysisAdapter::new(
                    analyzer,
                    config.middleware.clone(),
                    config.analyzer.timeout,
                ),
            }),
        })
    }

    /// Never fails: any fault inside the pipeline, panics included, comes
    /// back as a 500 response.
    pub async fn evaluate(&self, request: &mut InboundRequest) -> ControlFlow {
        let started = Instant::now();
        let ctx = RequestContext::extract(request);
        let inner = self.inner.clone();

        let (decision, source) = match tokio::spawn(async move { inner.decide(ctx).await }).await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %err,
                    "decision pipeline failed"
                );
                failure(&err.to_string())
            }
            Err(err) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = %err,
                    "decision pipeline aborted"
                );
                failure(&join_failure_message(err))
            }
        };

        request.decision_source = Some(source.as_str());
        request.decision_action = Some(decision.action());

        let flow = match dispatch(&decision, source, &mut request.headers) {
            Ok(flow) => flow,
            Err(err) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    action = decision.action(),
                    error = %err,
                    "decision could not be applied"
                );
                ControlFlow::ShortCircuit(error_response(&failure_message(&err.to_string())))
            }
        };

        tracing::debug!(
            request_id = %request.request_id,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            action = decision.action(),
            source = source.as_str(),
            reasoning = decision.reasoning().unwrap_or_default(),
            success = source != DecisionSource::Failure,
            execution_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "guard decision"
        );

        flow
    }

    /// Stops the rate limiter's sweeper and empties the decision cache.
    pub async fn shutdown(&self) {
        self.inner.limiter.destroy().await;
        let cached = self.inner.cache.len().await;
        self.inner.cache.clear().await;
        tracing::info!(cleared = cached, "decision engine shut down");
    }
}

impl EngineInner {
    async fn decide(&self, ctx: RequestContext) -> GuardResult<(Decision, DecisionSource)> {
        let key = cache_key(&ctx);

        if let Some(decision) = self.cache.get(&key).await {
            tracing::debug!(key = %key, "using cached decision");
            return Ok((decision, DecisionSource::Cache));
        }

        // Read-only check first; `try_acquire` claims the slot atomically.
        if !self.limiter.should_allow(&ctx.ip) || !self.limiter.try_acquire(&ctx.ip) {
            tracing::debug!(origin = %ctx.ip, "analysis rate limited; using fallback rules");
            let decision = self.heuristic.evaluate(&ctx).unwrap_or_else(Decision::allow);
            return Ok((decision, DecisionSource::Fallback));
        }

        let history = self.limiter.request_count(&ctx.ip);
        let decision = self.analysis.analyze(&ctx, history).await?;

        self.cache.set(key, decision.clone()).await;
        self.limiter.record_request(&ctx.ip);

        Ok((decision, DecisionSource::Analysis))
    }
}

fn failure_message(message: &str) -> String {
    format!("AI Middleware Error: {message}")
}

fn failure(message: &str) -> (Decision, DecisionSource) {
    (
        Decision::Error {
            reasoning: failure_message(message),
        },
        DecisionSource::Failure,
    )
}

fn join_failure_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "decision pipeline panicked".to_string()
    }
}
