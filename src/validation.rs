use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap};
use http_body_util::LengthLimitError;
use serde_json::Value;

use crate::adapters::DEFAULT_LANG;
use crate::config::Limits;
use crate::error::{ApiError, InvalidReason};

/// A validated correction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionRequest {
    pub text: String,
    pub lang: String,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Run every body check in order: media type, size, JSON shape, text.
    pub async fn correction_request(
        headers: &HeaderMap,
        body: Body,
        limits: Limits,
    ) -> Result<CorrectionRequest, ApiError> {
        Self::ensure_json(headers)?;
        Self::check_declared_length(headers, limits.max_body_bytes)?;
        let bytes = Self::read_body(body, limits.max_body_bytes).await?;
        let request = Self::parse_body(&bytes)?;
        Self::validate_text(&request.text, limits.max_chars)?;
        Ok(request)
    }

    /// The media type must be `application/json`; parameters are ignored.
    pub fn ensure_json(headers: &HeaderMap) -> Result<(), ApiError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let media_type = content_type.split(';').next().unwrap_or("").trim();

        if media_type.eq_ignore_ascii_case("application/json") {
            Ok(())
        } else {
            Err(ApiError::UnsupportedMediaType)
        }
    }

    /// Reject early on a declared length above the ceiling. An unparsable
    /// header is ignored; the bytes actually read are checked regardless.
    pub fn check_declared_length(headers: &HeaderMap, max_bytes: usize) -> Result<(), ApiError> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        match declared {
            Some(length) if length > max_bytes as u64 => Err(ApiError::PayloadTooLarge),
            _ => Ok(()),
        }
    }

    pub async fn read_body(body: Body, max_bytes: usize) -> Result<Bytes, ApiError> {
        to_bytes(body, max_bytes).await.map_err(|err| {
            if err.into_inner().is::<LengthLimitError>() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::InvalidInput(InvalidReason::InvalidBody)
            }
        })
    }

    /// Extract `text` and `lang` from a JSON object body.
    pub fn parse_body(bytes: &[u8]) -> Result<CorrectionRequest, ApiError> {
        let payload: Value = serde_json::from_slice(bytes)
            .map_err(|_| ApiError::InvalidInput(InvalidReason::InvalidJson))?;
        let object = payload
            .as_object()
            .ok_or(ApiError::InvalidInput(InvalidReason::InvalidBody))?;

        let text = match object.get("text") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        let lang = match object.get("lang") {
            Some(Value::String(lang)) if !lang.is_empty() => lang.clone(),
            _ => DEFAULT_LANG.to_string(),
        };

        Ok(CorrectionRequest { text, lang })
    }

    /// Text must contain a non-whitespace character and fit `max_chars`.
    pub fn validate_text(text: &str, max_chars: usize) -> Result<(), ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::InvalidInput(InvalidReason::Empty));
        }
        if text.chars().count() > max_chars {
            return Err(ApiError::InvalidInput(InvalidReason::TooLong));
        }
        Ok(())
    }
}
