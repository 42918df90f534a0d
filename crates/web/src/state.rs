//! Outgoing cookie state.
//!
//! Cookies are queued against the request during the lifecycle via the reply
//! interface and rendered into `Set-Cookie` headers by the transmit pipeline,
//! merged with any server-configured auto-value cookies.

use http::HeaderValue;

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub ttl_ms: Option<u64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ttl_ms: None,
            path: None,
            domain: None,
            http_only: false,
            secure: false,
        }
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Renders one `Set-Cookie` value.
    pub(crate) fn render(&self) -> Option<HeaderValue> {
        let mut rendered = format!("{}={}", self.name, self.value);
        if let Some(ttl_ms) = self.ttl_ms {
            rendered.push_str(&format!("; Max-Age={}", ttl_ms / 1000));
        }
        if let Some(path) = &self.path {
            rendered.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = &self.domain {
            rendered.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            rendered.push_str("; Secure");
        }
        if self.http_only {
            rendered.push_str("; HttpOnly");
        }
        HeaderValue::from_str(&rendered).ok()
    }
}

/// One queued cookie mutation.
#[derive(Debug, Clone)]
pub enum CookieOp {
    Set(Cookie),
    /// Expire the named cookie on the client.
    Clear(String),
}

impl CookieOp {
    pub fn name(&self) -> &str {
        match self {
            CookieOp::Set(cookie) => &cookie.name,
            CookieOp::Clear(name) => name,
        }
    }

    pub(crate) fn render(&self) -> Option<HeaderValue> {
        match self {
            CookieOp::Set(cookie) => cookie.render(),
            CookieOp::Clear(name) => HeaderValue::from_str(&format!("{name}=; Max-Age=0")).ok(),
        }
    }
}
