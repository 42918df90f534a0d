//! The response model: the outcome of a request, not yet bytes on a wire.
//!
//! A [`Response`] is a closed tagged payload variant plus status, headers and
//! settings. It is created by [`Response::wrap`] from whatever a handler or
//! extension produced, mutated by the lifecycle stages, and finally marshalled
//! by the transmit pipeline. Classification happens exactly once, at wrap
//! time; later stages match on the variant instead of probing the value.

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use tracing::warn;

use crate::body::ResponseBody;
use crate::fault::Fault;

/// A raw value on its way to becoming a response payload.
///
/// Handlers and extensions produce these through `From` conversions; the
/// variants mirror the closed set of payload classifications.
#[derive(Debug)]
pub enum ReplyValue {
    Null,
    Text(String),
    Json(serde_json::Value),
    Binary(Bytes),
    Stream(ResponseBody),
    Error(Fault),
}

impl From<()> for ReplyValue {
    fn from((): ()) -> Self {
        ReplyValue::Null
    }
}

impl From<&str> for ReplyValue {
    fn from(value: &str) -> Self {
        ReplyValue::Text(value.to_owned())
    }
}

impl From<String> for ReplyValue {
    fn from(value: String) -> Self {
        ReplyValue::Text(value)
    }
}

impl From<serde_json::Value> for ReplyValue {
    fn from(value: serde_json::Value) -> Self {
        ReplyValue::Json(value)
    }
}

impl From<Bytes> for ReplyValue {
    fn from(value: Bytes) -> Self {
        ReplyValue::Binary(value)
    }
}

impl From<ResponseBody> for ReplyValue {
    fn from(value: ResponseBody) -> Self {
        ReplyValue::Stream(value)
    }
}

impl From<Fault> for ReplyValue {
    fn from(value: Fault) -> Self {
        ReplyValue::Error(value)
    }
}

/// The closed payload classification.
#[derive(Debug)]
pub enum Payload {
    Empty,
    Text(String),
    Json(serde_json::Value),
    Binary(Bytes),
    Stream(ResponseBody),
    Error(Fault),
}

impl Payload {
    /// Stable name of the variant, used for diagnostics and tests.
    pub fn variant(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Text(_) => "text",
            Payload::Json(_) => "json",
            Payload::Binary(_) => "binary",
            Payload::Stream(_) => "stream",
            Payload::Error(_) => "error",
        }
    }
}

/// How a header write treats an existing value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetPolicy {
    /// Replace any existing value.
    Set,
    /// Keep an existing value, write only if absent.
    SetIfAbsent,
    /// Add another value, keeping existing ones.
    Append,
}

/// Per-response knobs consulted by the transmit pipeline.
#[derive(Debug, Default, Clone)]
pub struct ResponseSettings {
    /// Cache ttl override in milliseconds; wins over the route's ttl.
    pub ttl_ms: Option<u64>,
    /// Charset appended to text-like content types. Defaults to utf-8.
    pub charset: Option<String>,
    /// Pass upstream headers through untouched (proxied stream responses).
    pub pass_through: bool,
}

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    payload: Payload,
    settings: ResponseSettings,
    closed: bool,
}

impl Response {
    /// Classifies a raw value into a response. Classification is pure: the
    /// same input always produces the same variant, status and headers.
    pub fn wrap(value: impl Into<ReplyValue>) -> Self {
        let (payload, status) = match value.into() {
            ReplyValue::Null => (Payload::Empty, StatusCode::OK),
            ReplyValue::Text(text) if text.is_empty() => (Payload::Empty, StatusCode::OK),
            ReplyValue::Text(text) => (Payload::Text(text), StatusCode::OK),
            ReplyValue::Json(value) => (Payload::Json(value), StatusCode::OK),
            ReplyValue::Binary(bytes) if bytes.is_empty() => (Payload::Empty, StatusCode::OK),
            ReplyValue::Binary(bytes) => (Payload::Binary(bytes), StatusCode::OK),
            ReplyValue::Stream(body) => (Payload::Stream(body), StatusCode::OK),
            ReplyValue::Error(fault) => {
                let status = fault.status();
                (Payload::Error(fault), status)
            }
        };

        Self { status, headers: HeaderMap::new(), payload, settings: ResponseSettings::default(), closed: false }
    }

    pub fn empty() -> Self {
        Self::wrap(())
    }

    pub fn from_fault(fault: Fault) -> Self {
        let mut response = Self::wrap(ReplyValue::Error(fault.clone()));
        for challenge in fault.challenges() {
            match HeaderValue::from_str(challenge) {
                Ok(value) => {
                    response.headers.append(header::WWW_AUTHENTICATE, value);
                }
                Err(_) => warn!(challenge, "dropping unencodable challenge header"),
            }
        }
        response
    }

    /// A no-payload marker telling the transport to end the response without
    /// any further processing.
    pub fn closed() -> Self {
        let mut response = Self::empty();
        response.closed = true;
        response
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Writes a header under an explicit policy.
    pub fn header(&mut self, name: HeaderName, value: HeaderValue, policy: SetPolicy) -> &mut Self {
        match policy {
            SetPolicy::Set => {
                self.headers.insert(name, value);
            }
            SetPolicy::SetIfAbsent => {
                if !self.headers.contains_key(&name) {
                    self.headers.insert(name, value);
                }
            }
            SetPolicy::Append => {
                self.headers.append(name, value);
            }
        }
        self
    }

    pub fn etag(&mut self, tag: &str) -> &mut Self {
        let quoted = format!("\"{}\"", tag.trim_matches('"'));
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            self.headers.insert(header::ETAG, value);
        }
        self
    }

    pub fn location(&mut self, uri: &str) -> &mut Self {
        if let Ok(value) = HeaderValue::from_str(uri) {
            self.headers.insert(header::LOCATION, value);
        }
        self
    }

    /// Turns the response into a 302 redirect to `uri`.
    pub fn redirect(&mut self, uri: &str) -> &mut Self {
        self.location(uri);
        self.code(StatusCode::FOUND)
    }

    pub fn ttl(&mut self, ttl_ms: u64) -> &mut Self {
        self.settings.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.settings.charset = Some(charset.into());
        self
    }

    pub fn pass_through(&mut self, enabled: bool) -> &mut Self {
        self.settings.pass_through = enabled;
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn settings(&self) -> &ResponseSettings {
        &self.settings
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn fault(&self) -> Option<&Fault> {
        match &self.payload {
            Payload::Error(fault) => Some(fault),
            _ => None,
        }
    }

    /// Consumes the payload, producing the byte source and the content type
    /// implied by the variant (used only if no content-type is already set).
    pub(crate) fn take_payload(&mut self) -> Payload {
        std::mem::replace(&mut self.payload, Payload::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_classifies_by_type() {
        assert_eq!(Response::wrap(()).payload().variant(), "empty");
        assert_eq!(Response::wrap("").payload().variant(), "empty");
        assert_eq!(Response::wrap("hi").payload().variant(), "text");
        assert_eq!(Response::wrap(serde_json::json!({"a": 1})).payload().variant(), "json");
        assert_eq!(Response::wrap(Bytes::from_static(b"\x00\x01")).payload().variant(), "binary");
        assert_eq!(Response::wrap(ResponseBody::empty()).payload().variant(), "stream");
        assert_eq!(Response::wrap(Fault::not_found("nope")).payload().variant(), "error");
    }

    #[test]
    fn wrap_is_idempotent_per_input() {
        let first = Response::wrap("same text");
        let second = Response::wrap("same text");

        assert_eq!(first.status(), second.status());
        assert_eq!(first.payload().variant(), second.payload().variant());
        assert_eq!(first.headers().len(), second.headers().len());
    }

    #[test]
    fn error_wrap_takes_fault_status() {
        let response = Response::wrap(Fault::forbidden("no"));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn header_policies() {
        let mut response = Response::empty();
        let name = HeaderName::from_static("x-test");

        response.header(name.clone(), HeaderValue::from_static("a"), SetPolicy::Set);
        response.header(name.clone(), HeaderValue::from_static("b"), SetPolicy::SetIfAbsent);
        assert_eq!(response.headers().get("x-test").unwrap(), "a");

        response.header(name.clone(), HeaderValue::from_static("c"), SetPolicy::Append);
        assert_eq!(response.headers().get_all("x-test").iter().count(), 2);

        response.header(name, HeaderValue::from_static("d"), SetPolicy::Set);
        assert_eq!(response.headers().get_all("x-test").iter().count(), 1);
        assert_eq!(response.headers().get("x-test").unwrap(), "d");
    }

    #[test]
    fn etag_is_quoted_once() {
        let mut response = Response::wrap("x");
        response.etag("abc");
        assert_eq!(response.headers().get(header::ETAG).unwrap(), "\"abc\"");

        response.etag("\"def\"");
        assert_eq!(response.headers().get(header::ETAG).unwrap(), "\"def\"");
    }

    #[test]
    fn unauthorized_fault_renders_challenges() {
        let fault = Fault::unauthorized("Missing authentication").with_challenge("Basic").with_challenge("Bearer");
        let response = Response::from_fault(fault);
        let values: Vec<_> = response.headers().get_all(header::WWW_AUTHENTICATE).iter().collect();
        assert_eq!(values, ["Basic", "Bearer"]);
    }
}
