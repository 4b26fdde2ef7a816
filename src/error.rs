use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("analysis service unavailable: {0}")]
    AnalysisUnavailable(String),
    #[error("analysis timed out after {}ms", .0.as_millis())]
    AnalysisTimeout(Duration),
    #[error("malformed analysis response: {0}")]
    MalformedDecision(String),
    #[error("decision cannot be applied: {0}")]
    InvalidDecision(String),
    #[error("request body exceeds configured limit")]
    PayloadTooLarge,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AnalysisUnavailable(_) => "analysis_unavailable",
            Self::AnalysisTimeout(_) => "analysis_timeout",
            Self::MalformedDecision(_) => "malformed_decision",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::AnalysisUnavailable(_)
            | Self::AnalysisTimeout(_)
            | Self::MalformedDecision(_)
            | Self::InvalidDecision(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        }))
            .into_response();

        if !response.headers().contains_key(header::CONTENT_TYPE) {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        response
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        Self::AnalysisUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedDecision(err.to_string())
    }
}
