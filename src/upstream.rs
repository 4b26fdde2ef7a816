use axum::{
    body::Body,
    response::Response,
};
use http::header::HeaderName;
use std::time::{
    Duration,
    Instant,
};

use crate::{
    config::UpstreamConfig,
    context::InboundRequest,
    error::{GuardError, GuardResult},
};

/// The protected service that allowed requests are handed on to.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    cfg: UpstreamConfig,
}

impl Upstream {
    pub fn new(cfg: UpstreamConfig) -> GuardResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GuardError::Internal(e.to_string()))?;

        Ok(Self { client, cfg })
    }

    pub fn target_url(&self, req: &InboundRequest) -> String {
        let path_and_query = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(req.uri.path());
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path_and_query)
    }

    pub async fn forward(&self, req: &InboundRequest) -> GuardResult<Response<Body>> {
        let mut request = self
            .client
            .request(req.method.clone(), self.target_url(req))
            .body(req.body.clone());

        for (name, value) in &req.headers {
            if should_forward_header(name) {
                request = request.header(name, value);
            }
        }

        request = request.header("x-request-id", req.request_id.clone());
        if let Some(client_ip) = req.client_ip {
            request = request.header("x-forwarded-for", client_ip.to_string());
        }

        let started = Instant::now();
        let upstream_response = request
            .timeout(Duration::from_millis(self.cfg.timeout_ms))
            .send()
            .await
            .map_err(|e| GuardError::Upstream(e.to_string()))?;

        let status = upstream_response.status();
        let headers = upstream_response.headers().clone();
        let body = upstream_response
            .bytes()
            .await
            .map_err(|e| GuardError::Upstream(e.to_string()))?;

        tracing::debug!(
            request_id = %req.request_id,
            status = %status,
            upstream_ms = started.elapsed().as_millis() as u64,
            "upstream responded"
        );

        let mut builder = Response::builder().status(status);
        for (name, value) in &headers {
            if should_forward_header(name) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from(body))
            .map_err(|e| GuardError::Internal(e.to_string()))
    }
}

fn should_forward_header(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}
