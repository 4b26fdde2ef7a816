use std::{
    net::IpAddr,
    sync::Arc,
};

use axum::{
    body::{
        Body,
        to_bytes,
    },
    http::{
        HeaderName,
        HeaderValue,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use uuid::Uuid;

use crate::{
    config::GuardConfig,
    context::InboundRequest,
    error::{GuardError, GuardResult},
    guard::{
        GuardEngine,
        analysis::Analyzer,
    },
    middleware::{
        ControlFlow,
        GatewayMiddleware,
        guard::DecisionGuardMiddleware,
        logging::RequestLoggingMiddleware,
    },
    upstream::Upstream,
};

pub struct Gateway {
    middlewares: Vec<Arc<dyn GatewayMiddleware>>,
    engine: GuardEngine,
    upstream: Upstream,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn from_config(config: &GuardConfig, analyzer: Arc<dyn Analyzer>) -> GuardResult<Self> {
        let engine = GuardEngine::new(config, analyzer)?;

        let middlewares: Vec<Arc<dyn GatewayMiddleware>> = vec![
            Arc::new(RequestLoggingMiddleware),
            Arc::new(DecisionGuardMiddleware::new(
                engine.clone(),
                config.public_path_prefixes.clone(),
            )),
        ];

        Ok(Self {
            middlewares,
            engine,
            upstream: Upstream::new(config.upstream.clone())?,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub async fn handle_http(
        &self,
        request: Request<Body>,
        client_ip: Option<IpAddr>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let body = match to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(_) => {
                let mut response = GuardError::PayloadTooLarge.into_response();
                self.attach_hardening_headers("unknown", &mut response);
                return response;
            }
        };

        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut req = InboundRequest::new(
            request_id,
            parts.method,
            parts.uri,
            parts.headers,
            body,
            client_ip,
        );

        let mut executed = Vec::new();

        for (idx, middleware) in self.middlewares.iter().enumerate() {
            match middleware.on_request(&mut req).await {
                Ok(ControlFlow::Continue) => executed.push(idx),
                Ok(ControlFlow::ShortCircuit(mut response)) => {
                    self.apply_response_middlewares(&executed, &req, &mut response)
                        .await;
                    self.attach_hardening_headers(&req.request_id, &mut response);
                    return response;
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %req.request_id,
                        middleware = middleware.name(),
                        error = %err,
                        "middleware rejected request"
                    );
                    let mut response = err.into_response();
                    self.apply_response_middlewares(&executed, &req, &mut response)
                        .await;
                    self.attach_hardening_headers(&req.request_id, &mut response);
                    return response;
                }
            }
        }

        let mut response = match self.upstream.forward(&req).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    request_id = %req.request_id,
                    error = %err,
                    "upstream call failed"
                );
                err.into_response()
            }
        };

        self.apply_response_middlewares(&executed, &req, &mut response)
            .await;
        self.attach_hardening_headers(&req.request_id, &mut response);
        response
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    async fn apply_response_middlewares(
        &self,
        executed: &[usize],
        req: &InboundRequest,
        response: &mut Response<Body>,
    ) {
        for idx in executed.iter().rev() {
            let middleware = &self.middlewares[*idx];
            if let Err(err) = middleware.on_response(req, response).await {
                tracing::warn!(
                    request_id = %req.request_id,
                    middleware = middleware.name(),
                    error = %err,
                    "middleware post-response hook failed"
                );
            }
        }
    }

    fn attach_hardening_headers(&self, request_id: &str, response: &mut Response<Body>) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-request-id"), value);
        }

        response.headers_mut().insert(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        );
        response.headers_mut().insert(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        );
        response.headers_mut().insert(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        );
    }
}
