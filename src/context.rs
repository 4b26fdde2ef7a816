use bytes::Bytes;
use http::{HeaderMap, Method, Uri, header};
use serde::Serialize;
use serde_json::Value;
use std::{
    net::IpAddr,
    time::Instant,
};

/// Per-request state carried through the gateway's middleware chain.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub started_at: Instant,
    pub decision_source: Option<&'static str>,
    pub decision_action: Option<&'static str>,
}

impl InboundRequest {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers,
            body,
            client_ip,
            started_at: Instant::now(),
            decision_source: None,
            decision_action: None,
        }
    }
}

/// Normalized view of a request, as seen by the decision engine and the
/// analysis service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub method: String,
    pub pathname: String,
    pub url: String,
    pub user_agent: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn extract(request: &InboundRequest) -> Self {
        Self {
            method: request.method.as_str().to_string(),
            pathname: request.uri.path().to_string(),
            url: full_url(&request.uri, &request.headers),
            user_agent: header_str(&request.headers, header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
            ip: origin_id(&request.headers, request.client_ip),
            body: parse_body(&request.body),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn full_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, header::HOST.as_str()).unwrap_or("localhost");
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{scheme}://{host}{path_and_query}")
}

fn origin_id(headers: &HeaderMap, client_ip: Option<IpAddr>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for")
        && let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    client_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_body(body: &Bytes) -> Option<Value> {
    if body.is_empty() {
        return None;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(body).into_owned())),
    }
}
