//! Maps raw remote-call failures onto [`ErrorKind`].
//!
//! Harbor is not consistent about how it reports "not found" and "already
//! exists": most endpoints use 404/409, some wrap the condition in a 400 or
//! 500 with an error code in the body. The body code wins when present.

use reqwest::StatusCode;

use crate::clients::model::ErrorEnvelope;
use crate::error::{ErrorKind, RemoteError};

/// Classify an HTTP status code.
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        404 => ErrorKind::NotFound,
        409 => ErrorKind::AlreadyExists,
        400 | 422 => ErrorKind::Validation,
        408 | 429 => ErrorKind::Transient,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a Harbor error code (`errors[].code`).
pub fn classify_code(code: &str) -> Option<ErrorKind> {
    match code {
        "NOT_FOUND" => Some(ErrorKind::NotFound),
        "CONFLICT" => Some(ErrorKind::AlreadyExists),
        _ => None,
    }
}

/// Classify a non-success response from its status and raw body.
pub fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();

    let kind = envelope
        .errors
        .iter()
        .find_map(|e| classify_code(&e.code))
        .unwrap_or_else(|| classify_status(status));

    let detail = envelope
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let message = if detail.is_empty() {
        let body = body.trim();
        if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        }
    } else {
        format!("{}: {}", status, detail)
    };

    RemoteError::new(kind, message)
}

/// Classify a transport-level error from reqwest.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if let Some(status) = err.status() {
        return classify_status(status);
    }
    if err.is_builder() {
        ErrorKind::Validation
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        ErrorKind::Transient
    } else {
        ErrorKind::Unknown
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::new(classify_transport(&err), err.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::validation(err.to_string())
    }
}
