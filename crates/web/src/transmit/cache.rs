//! Cache-Control policy.
//!
//! Precedence: an explicit response ttl, then the route's ttl, then
//! `no-cache`. The `private` qualifier is forced whenever the requester is
//! authenticated or the response sets a cookie, so shared caches never store
//! a personalized response. A caller-set Cache-Control is never overridden.

use http::header::{self, HeaderValue};
use http::StatusCode;

use crate::request::Request;
use crate::response::{Response, SetPolicy};

pub(crate) fn apply(request: &Request, response: &mut Response) {
    let ttl_ms = response
        .settings()
        .ttl_ms
        .or_else(|| request.route().and_then(|route| route.ttl_ms()))
        .filter(|_| response.status() == StatusCode::OK);

    let mut policy = match ttl_ms {
        Some(ttl_ms) => format!("max-age={}, must-revalidate", ttl_ms / 1000),
        None => "no-cache".to_owned(),
    };

    let private = request.auth.is_authenticated || !request.cookie_ops().is_empty();
    if private {
        policy.push_str(", private");
    }

    if let Ok(value) = HeaderValue::from_str(&policy) {
        response.header(header::CACHE_CONTROL, value, SetPolicy::SetIfAbsent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Cookie;
    use bytes::Bytes;

    fn request() -> Request {
        Request::from_http(http::Request::builder().uri("/").body(Bytes::new()).unwrap())
    }

    fn cache_control(response: &Response) -> &str {
        response.headers().get(header::CACHE_CONTROL).unwrap().to_str().unwrap()
    }

    #[test]
    fn response_ttl_renders_max_age() {
        let mut response = Response::wrap("x");
        response.ttl(90_000);
        apply(&request(), &mut response);
        assert_eq!(cache_control(&response), "max-age=90, must-revalidate");
    }

    #[test]
    fn default_is_no_cache() {
        let mut response = Response::wrap("x");
        apply(&request(), &mut response);
        assert_eq!(cache_control(&response), "no-cache");
    }

    #[test]
    fn authenticated_requests_get_private() {
        let mut req = request();
        req.auth.is_authenticated = true;
        let mut response = Response::wrap("x");
        response.ttl(60_000);
        apply(&req, &mut response);
        assert_eq!(cache_control(&response), "max-age=60, must-revalidate, private");
    }

    #[test]
    fn cookie_setting_forces_private() {
        let mut req = request();
        req.state(Cookie::new("sid", "abc"));
        let mut response = Response::wrap("x");
        apply(&req, &mut response);
        assert_eq!(cache_control(&response), "no-cache, private");
    }

    #[test]
    fn caller_set_cache_control_is_preserved() {
        let mut response = Response::wrap("x");
        response.headers_mut().insert(header::CACHE_CONTROL, "public, max-age=3600".parse().unwrap());
        apply(&request(), &mut response);
        assert_eq!(cache_control(&response), "public, max-age=3600");
    }
}
