use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Failures raised by a correction backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CorrectionError {
    /// Every upstream credential is spent (or none is configured).
    #[error("upstream quota exhausted: {0}")]
    Exhausted(&'static str),

    /// The upstream rejected the current credential for quota reasons.
    #[error("upstream quota rejected: {0}")]
    QuotaRejected(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("stream error: {0}")]
    Stream(String),
}

impl CorrectionError {
    pub const ALL_KEYS_EXHAUSTED: &'static str = "quota is exhausted for all keys, try again later";
    pub const NO_KEYS: &'static str = "no upstream API keys configured";

    /// Whether the failure means the credential in use hit its quota.
    pub fn is_quota(&self) -> bool {
        matches!(self, CorrectionError::QuotaRejected(_))
    }

    /// Message safe to show a client; upstream response bodies stay out.
    pub fn public_message(&self) -> &'static str {
        match self {
            CorrectionError::Exhausted(_) => "upstream quota is exhausted, try again later",
            CorrectionError::EmptyResponse => "correction backend returned an empty response",
            _ => "correction backend failed",
        }
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CorrectionError::Exhausted(_) => "exhausted",
            CorrectionError::QuotaRejected(_) => "quota_rejected",
            CorrectionError::Upstream { .. } => "upstream",
            CorrectionError::Http(_) => "http",
            CorrectionError::EmptyResponse => "empty_response",
            CorrectionError::Stream(_) => "stream",
        }
    }
}

impl From<reqwest::Error> for CorrectionError {
    fn from(err: reqwest::Error) -> Self {
        CorrectionError::Http(err.to_string())
    }
}

/// Why a request body was refused as invalid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    TooLong,
    InvalidJson,
    InvalidBody,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Empty => "empty",
            InvalidReason::TooLong => "too_long",
            InvalidReason::InvalidJson => "invalid_json",
            InvalidReason::InvalidBody => "invalid_body",
        }
    }
}

/// Errors surfaced to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {}", .0.as_str())]
    InvalidInput(InvalidReason),
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("rate limited")]
    RateLimited,
    #[error("too many concurrent streams")]
    TooManyStreams,
    #[error("server error (request {request_id})")]
    Server { request_id: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited | ApiError::TooManyStreams => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Server { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Outcome label used when counting the request.
    pub fn outcome(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) | ApiError::UnsupportedMediaType | ApiError::PayloadTooLarge => {
                "invalid_input"
            }
            ApiError::RateLimited | ApiError::TooManyStreams => "rate_limited",
            ApiError::Server { .. } => "error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn from_api_error(err: &ApiError) -> Self {
        let (error, message, request_id) = match err {
            ApiError::InvalidInput(reason) => ("invalid_input", Some(reason.as_str()), None),
            ApiError::UnsupportedMediaType => ("unsupported_media_type", None, None),
            ApiError::PayloadTooLarge => ("payload_too_large", None, None),
            ApiError::RateLimited => ("rate_limited", None, None),
            ApiError::TooManyStreams => ("rate_limited", Some("too_many_streams"), None),
            ApiError::Server { request_id } => ("server_error", None, Some(request_id.clone())),
        };
        Self {
            error,
            message,
            request_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from_api_error(&self))).into_response()
    }
}

/// Startup configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures while building or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("backend setup failed: {0}")]
    Backend(#[from] CorrectionError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
