//! Response transmission.
//!
//! Takes the finalized [`Response`] and turns it into a wire-ready
//! `http::Response<ResponseBody>`. Stages run in a fixed order, each mutating
//! headers but never the payload classification: conditional 304, payload
//! marshalling, content type, CORS, security headers, cache policy, cookies,
//! byte ranges, compression, and finally the auth scheme's response hook.
//! This function never fails; whatever happens, the client gets a response.

pub mod cache;
pub mod compress;
pub mod conditional;
pub mod cors;
mod httpdate;
pub mod range;
pub mod security;

pub use cors::CorsConfig;
pub use security::SecurityConfig;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use tracing::warn;

use crate::auth::AuthRegistry;
use crate::body::ResponseBody;
use crate::request::Request;
use crate::response::{Payload, Response, SetPolicy};
use crate::state::Cookie;

pub(crate) struct TransmitContext<'a> {
    pub auth: &'a AuthRegistry,
    pub security: Option<&'a SecurityConfig>,
    pub auto_cookies: &'a [Cookie],
}

pub(crate) async fn finalize(
    ctx: &TransmitContext<'_>,
    request: &mut Request,
    mut response: Response,
) -> http::Response<ResponseBody> {
    if response.is_closed() {
        let mut closed = http::Response::new(ResponseBody::empty());
        *closed.status_mut() = response.status();
        closed.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        return closed;
    }

    conditional::apply(request, &mut response);

    let mut body = marshal(request.method(), &mut response);

    cors::apply(request, &mut response);
    if let Some(security) = ctx.security {
        security::apply(security, &mut response);
    }
    cache::apply(request, &mut response);
    apply_cookies(ctx.auto_cookies, request, &mut response);
    range::apply(request, &mut response, &mut body);
    compress::apply(request, &mut response, &mut body);

    // The scheme's response hook runs last so it can sign final headers.
    if request.auth.is_authenticated
        && let Some(name) = request.auth.strategy.clone()
        && let Some(scheme) = ctx.auth.get(&name)
    {
        scheme.response(request, &mut response).await;
    }

    assemble(response, body)
}

/// Converts the payload variant into a byte source and resolves the content
/// type. Statuses that carry no body get an explicit empty source, releasing
/// any stream eagerly.
fn marshal(method: &Method, response: &mut Response) -> ResponseBody {
    let (body, implied_type): (ResponseBody, Option<&str>) = match response.take_payload() {
        Payload::Empty => (ResponseBody::empty(), None),
        Payload::Text(text) => (ResponseBody::from(text), Some(mime::TEXT_HTML.as_ref())),
        Payload::Json(value) => match serde_json::to_string(&value) {
            Ok(rendered) => (ResponseBody::from(rendered), Some(mime::APPLICATION_JSON.as_ref())),
            Err(err) => {
                warn!(%err, "response value failed to serialize");
                response.code(StatusCode::INTERNAL_SERVER_ERROR);
                let fault = crate::fault::Fault::internal(err.to_string());
                (ResponseBody::from(fault.client_payload().to_string()), Some(mime::APPLICATION_JSON.as_ref()))
            }
        },
        Payload::Binary(bytes) => (ResponseBody::once(bytes), Some(mime::APPLICATION_OCTET_STREAM.as_ref())),
        Payload::Stream(stream) => (stream, None),
        Payload::Error(fault) => {
            (ResponseBody::from(fault.client_payload().to_string()), Some(mime::APPLICATION_JSON.as_ref()))
        }
    };

    if !response.headers().contains_key(header::CONTENT_TYPE)
        && let Some(content_type) = implied_type
    {
        let value = with_charset(content_type, response.settings().charset.as_deref());
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }

    let bodyless = response.status() == StatusCode::NOT_MODIFIED
        || response.status() == StatusCode::NO_CONTENT
        || method == Method::HEAD;
    if bodyless {
        drop(body);
        return ResponseBody::empty();
    }
    body
}

/// Text-like types get an explicit charset unless the type already names one.
fn with_charset(content_type: &str, charset: Option<&str>) -> String {
    let text_like = content_type.starts_with("text/")
        || content_type == mime::APPLICATION_JSON.as_ref()
        || content_type == "application/javascript";
    if text_like && !content_type.contains("charset") {
        format!("{content_type}; charset={}", charset.unwrap_or("utf-8"))
    } else {
        content_type.to_owned()
    }
}

/// Merges request-queued cookie mutations with server auto cookies not
/// already present, always appending to handler-set Set-Cookie values.
fn apply_cookies(auto_cookies: &[Cookie], request: &Request, response: &mut Response) {
    for op in request.cookie_ops() {
        if let Some(value) = op.render() {
            response.header(header::SET_COOKIE, value, SetPolicy::Append);
        }
    }

    for cookie in auto_cookies {
        let already_queued = request.cookie_ops().iter().any(|op| op.name() == cookie.name);
        let already_set = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.split('=').next() == Some(cookie.name.as_str()));
        if !already_queued
            && !already_set
            && let Some(value) = cookie.render()
        {
            response.header(header::SET_COOKIE, value, SetPolicy::Append);
        }
    }
}

fn assemble(response: Response, body: ResponseBody) -> http::Response<ResponseBody> {
    let mut assembled = http::Response::new(ResponseBody::empty());
    *assembled.status_mut() = response.status();
    *assembled.headers_mut() = response.headers().clone();

    if !assembled.headers().contains_key(header::CONTENT_LENGTH)
        && !assembled.headers().contains_key(header::CONTENT_ENCODING)
        && let Some(len) = body.exact_len()
    {
        assembled.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    *assembled.body_mut() = body;
    assembled
}

pub(crate) fn fallback(status: StatusCode) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(ResponseBody::from(
        status.canonical_reason().unwrap_or("Internal Server Error"),
    ));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    let len = response.body().exact_len().unwrap_or(0);
    response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn charset_is_appended_to_text_like_types() {
        assert_eq!(with_charset("text/html", None), "text/html; charset=utf-8");
        assert_eq!(with_charset("application/json", Some("ascii")), "application/json; charset=ascii");
        assert_eq!(with_charset("text/plain; charset=latin1", None), "text/plain; charset=latin1");
        assert_eq!(with_charset("application/octet-stream", None), "application/octet-stream");
    }

    #[test]
    fn head_marshals_an_empty_body_with_headers_intact() {
        let mut response = Response::wrap("some page");
        let body = marshal(&Method::HEAD, &mut response);

        assert!(body.is_empty());
        assert!(response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn error_payload_marshals_client_safe_json() {
        let mut response = Response::wrap(crate::fault::Fault::internal("secret detail"));
        let body = marshal(&Method::GET, &mut response);

        let rendered = String::from_utf8(body.as_once().unwrap().to_vec()).unwrap();
        assert!(rendered.contains("\"statusCode\":500"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn fallback_is_always_complete() {
        let response = fallback(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "21");
    }

    #[test]
    fn assemble_sets_content_length_when_known() {
        let response = Response::wrap(());
        let assembled = assemble(response, ResponseBody::once(Bytes::from_static(b"12345")));
        assert_eq!(assembled.headers().get(header::CONTENT_LENGTH).unwrap(), "5");
    }
}
