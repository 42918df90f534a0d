//! Cross-origin response headers, applied only on routes that opted in.

use http::header::{self, HeaderValue};

use crate::request::Request;
use crate::response::{Response, SetPolicy};

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins: exact values, `*.domain` suffix wildcards, or `*`.
    pub origins: Vec<String>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    /// Allows every origin.
    pub fn any() -> Self {
        Self { origins: vec!["*".to_owned()], allow_credentials: false, expose_headers: Vec::new(), max_age_secs: None }
    }

    pub fn origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age_secs: None,
        }
    }

    pub fn credentials(mut self) -> Self {
        self.allow_credentials = true;
        self
    }

    fn matches(&self, origin: &str) -> bool {
        self.origins.iter().any(|allowed| {
            allowed == "*"
                || allowed == origin
                || (allowed.starts_with("*.") && origin.ends_with(&allowed[1..]))
        })
    }

    fn is_wildcard_only(&self) -> bool {
        self.origins.len() == 1 && self.origins[0] == "*"
    }
}

pub(crate) fn apply(request: &Request, response: &mut Response) {
    let Some(cors) = request.route().and_then(|route| route.cors()).cloned() else {
        return;
    };
    let Some(origin) = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
    else {
        return;
    };

    // Anything origin-dependent must tell caches so.
    if !cors.is_wildcard_only() {
        response.header(header::VARY, HeaderValue::from_static("origin"), SetPolicy::Append);
    }
    if !cors.matches(&origin) {
        return;
    }

    let allow_origin = if cors.is_wildcard_only() && !cors.allow_credentials {
        HeaderValue::from_static("*")
    } else {
        match HeaderValue::from_str(&origin) {
            Ok(value) => value,
            Err(_) => return,
        }
    };
    response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin, SetPolicy::Set);

    if cors.allow_credentials {
        response.header(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
            SetPolicy::Set,
        );
    }
    if !cors.expose_headers.is_empty()
        && let Ok(value) = HeaderValue::from_str(&cors.expose_headers.join(", "))
    {
        response.header(header::ACCESS_CONTROL_EXPOSE_HEADERS, value, SetPolicy::Set);
    }
    if let Some(max_age) = cors.max_age_secs {
        response.header(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age), SetPolicy::Set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_everything() {
        let cors = CorsConfig::any();
        assert!(cors.matches("https://example.com"));
        assert!(cors.is_wildcard_only());
    }

    #[test]
    fn suffix_wildcard_matches_subdomains() {
        let cors = CorsConfig::origins(["*.example.com", "https://app.io"]);
        assert!(cors.matches("https://api.example.com"));
        assert!(cors.matches("https://app.io"));
        assert!(!cors.matches("https://example.org"));
        assert!(!cors.is_wildcard_only());
    }
}
