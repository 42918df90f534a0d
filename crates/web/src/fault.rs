//! Error-shaped responses.
//!
//! A [`Fault`] carries an HTTP status plus a message that is safe to show the
//! client, and optionally internal detail that only ever goes to the log.
//! Everything that can go wrong before transmission — extension errors, auth
//! rejections, handler failures, prerequisite failures — is normalized into a
//! `Fault` and keeps flowing through the lifecycle like any other response.

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct Fault {
    status: StatusCode,
    message: String,
    detail: Option<String>,
    challenges: Vec<String>,
}

impl Fault {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), detail: None, challenges: Vec::new() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    /// An internal error. `detail` is kept for the log; the client only ever
    /// sees the generic 500 message.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred").with_detail(detail)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Adds one `WWW-Authenticate` challenge value.
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenges.push(challenge.into());
        self
    }

    pub fn with_challenges<I: IntoIterator<Item = String>>(mut self, challenges: I) -> Self {
        self.challenges.extend(challenges);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The message rendered for the client. Internal errors never leak their
    /// message; the canonical reason phrase is used instead. Other server
    /// statuses (503 and friends) carry deliberate messages and keep them.
    pub fn client_message(&self) -> &str {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            self.status.canonical_reason().unwrap_or("Internal Server Error")
        } else {
            &self.message
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn challenges(&self) -> &[String] {
        &self.challenges
    }

    /// The client-visible JSON body, matching the shape
    /// `{"statusCode": ..., "error": ..., "message": ...}`.
    pub fn client_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "statusCode": self.status.as_u16(),
            "error": self.status.canonical_reason().unwrap_or("Unknown"),
            "message": self.client_message(),
        })
    }
}

impl From<std::io::Error> for Fault {
    fn from(e: std::io::Error) -> Self {
        Fault::internal(e.to_string())
    }
}
