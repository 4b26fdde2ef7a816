use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    error::{GuardError, GuardResult},
    guard::decision::Decision,
};

const DEFAULT_BLOCK_STATUS: u16 = 403;
const DEFAULT_REDIRECT_TARGET: &str = "/";
const DEFAULT_ERROR_MESSAGE: &str = "Request rejected by analysis service";

pub enum ControlFlow {
    Continue,
    ShortCircuit(Response<Body>),
}

/// Where a decision came from; shapes the block message and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Cache,
    Analysis,
    Fallback,
    Failure,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Analysis => "analysis",
            Self::Fallback => "fallback",
            Self::Failure => "failure",
        }
    }

    fn block_message(&self) -> &'static str {
        match self {
            Self::Fallback => "Request blocked by security rules",
            Self::Cache | Self::Analysis | Self::Failure => "Request blocked by AI middleware",
        }
    }
}

#[derive(Serialize)]
struct BlockBody<'a> {
    error: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Turns a decision into a terminal response, or lets the request through
/// after applying any header changes to `headers`.
pub fn dispatch(
    decision: &Decision,
    source: DecisionSource,
    headers: &mut HeaderMap,
) -> GuardResult<ControlFlow> {
    match decision {
        Decision::Allow { .. } => Ok(ControlFlow::Continue),
        Decision::Block {
            status_code,
            reasoning,
        } => {
            let code = status_code.unwrap_or(DEFAULT_BLOCK_STATUS);
            let status = StatusCode::from_u16(code)
                .map_err(|_| GuardError::InvalidDecision(format!("invalid status code {code}")))?;

            Ok(ControlFlow::ShortCircuit(
                (status, Json(BlockBody {
                    error: source.block_message(),
                    reason: reasoning,
                }))
                    .into_response(),
            ))
        }
        Decision::Redirect { target_url, .. } => {
            let target = target_url.as_deref().unwrap_or(DEFAULT_REDIRECT_TARGET);
            let location = HeaderValue::from_str(target).map_err(|_| {
                GuardError::InvalidDecision(format!("invalid redirect target {target:?}"))
            })?;

            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            response.headers_mut().insert(header::LOCATION, location);
            Ok(ControlFlow::ShortCircuit(response))
        }
        Decision::Transform {
            headers: changes, ..
        } => {
            for (name, value) in changes {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    GuardError::InvalidDecision(format!("invalid header name {name:?}"))
                })?;
                let value = HeaderValue::from_str(value).map_err(|_| {
                    GuardError::InvalidDecision(format!("invalid value for header {name}"))
                })?;
                headers.insert(name, value);
            }
            Ok(ControlFlow::Continue)
        }
        Decision::Error { reasoning } => {
            let message = if reasoning.trim().is_empty() {
                DEFAULT_ERROR_MESSAGE
            } else {
                reasoning.as_str()
            };
            Ok(ControlFlow::ShortCircuit(error_response(message)))
        }
    }
}

pub fn error_response(message: &str) -> Response<Body> {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}
