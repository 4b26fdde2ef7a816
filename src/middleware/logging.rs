use async_trait::async_trait;
use axum::{body::Body, response::Response};
use http::header;

use crate::{
    context::InboundRequest,
    error::GuardResult,
    middleware::{ControlFlow, GatewayMiddleware},
};

/// Logs each request on arrival and, once answered, how the guard decided it.
pub struct RequestLoggingMiddleware;

#[async_trait]
impl GatewayMiddleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request-logging"
    }

    async fn on_request(&self, req: &mut InboundRequest) -> GuardResult<ControlFlow> {
        let user_agent = req
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        tracing::debug!(
            request_id = %req.request_id,
            method = %req.method,
            path = %req.uri.path(),
            peer = ?req.client_ip,
            user_agent,
            body_bytes = req.body.len(),
            "guarding request"
        );
        Ok(ControlFlow::Continue)
    }

    async fn on_response(
        &self,
        req: &InboundRequest,
        response: &mut Response<Body>,
    ) -> GuardResult<()> {
        let status = response.status();
        let source = req.decision_source.unwrap_or("none");
        let action = req.decision_action.unwrap_or("none");
        let latency_ms = req.started_at.elapsed().as_millis() as u64;

        if status.is_server_error() {
            tracing::warn!(
                request_id = %req.request_id,
                path = %req.uri.path(),
                source,
                action,
                status = status.as_u16(),
                latency_ms,
                "guarded request failed"
            );
        } else {
            tracing::info!(
                request_id = %req.request_id,
                path = %req.uri.path(),
                source,
                action,
                status = status.as_u16(),
                latency_ms,
                "guarded request answered"
            );
        }
        Ok(())
    }
}
