//! Standard security headers, written only where the caller left them unset.

use http::header::{self, HeaderName, HeaderValue};

use crate::response::{Response, SetPolicy};

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// `Strict-Transport-Security` max-age in seconds.
    pub hsts_max_age: Option<u64>,
    pub x_frame_options: Option<String>,
    pub xss_protection: bool,
    pub no_sniff: bool,
    pub no_open: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hsts_max_age: Some(15_768_000),
            x_frame_options: Some("DENY".to_owned()),
            xss_protection: true,
            no_sniff: true,
            no_open: true,
        }
    }
}

pub(crate) fn apply(config: &SecurityConfig, response: &mut Response) {
    if let Some(max_age) = config.hsts_max_age
        && let Ok(value) = HeaderValue::from_str(&format!("max-age={max_age}"))
    {
        response.header(header::STRICT_TRANSPORT_SECURITY, value, SetPolicy::SetIfAbsent);
    }
    if let Some(frame) = &config.x_frame_options
        && let Ok(value) = HeaderValue::from_str(frame)
    {
        response.header(header::X_FRAME_OPTIONS, value, SetPolicy::SetIfAbsent);
    }
    if config.xss_protection {
        response.header(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
            SetPolicy::SetIfAbsent,
        );
    }
    if config.no_sniff {
        response.header(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
            SetPolicy::SetIfAbsent,
        );
    }
    if config.no_open {
        response.header(
            HeaderName::from_static("x-download-options"),
            HeaderValue::from_static("noopen"),
            SetPolicy::SetIfAbsent,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    #[test]
    fn defaults_fill_every_header() {
        let mut response = Response::wrap("x");
        apply(&SecurityConfig::default(), &mut response);

        assert_eq!(response.headers().get(header::STRICT_TRANSPORT_SECURITY).unwrap(), "max-age=15768000");
        assert_eq!(response.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(response.headers().get(header::X_XSS_PROTECTION).unwrap(), "1; mode=block");
        assert_eq!(response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(response.headers().get("x-download-options").unwrap(), "noopen");
    }

    #[test]
    fn caller_set_values_win() {
        let mut response = Response::wrap("x");
        response.headers_mut().insert(header::X_FRAME_OPTIONS, "SAMEORIGIN".parse().unwrap());
        apply(&SecurityConfig::default(), &mut response);

        assert_eq!(response.headers().get(header::X_FRAME_OPTIONS).unwrap(), "SAMEORIGIN");
    }
}
