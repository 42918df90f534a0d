//! Conditional request handling.
//!
//! For GET and HEAD responses that would be a 200, a matching validator
//! forces a 304. The strong validator (ETag) is checked first; the weak one
//! (If-Modified-Since against Last-Modified) only applies when no ETag
//! comparison was possible.

use http::header;
use http::{Method, StatusCode};

use super::httpdate::parse_http_date;
use crate::request::Request;
use crate::response::Response;

pub(crate) fn apply(request: &Request, response: &mut Response) {
    if response.status() != StatusCode::OK {
        return;
    }
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return;
    }

    if not_modified(request, response) {
        response.code(StatusCode::NOT_MODIFIED);
    }
}

fn not_modified(request: &Request, response: &Response) -> bool {
    let etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.entity.etag.clone());
    if let Some(etag) = etag {
        if let Some(if_none_match) = request.headers().get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
            return if_none_match.split(',').any(|candidate| candidate.trim() == etag);
        }
        // fall through to the weak validator
    }

    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.entity.modified.clone());
    if let (Some(last_modified), Some(if_modified_since)) = (
        last_modified,
        request.headers().get(header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()),
    ) && let (Some(modified), Some(since)) = (parse_http_date(&last_modified), parse_http_date(if_modified_since))
    {
        return since >= modified;
    }

    false
}
