use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A parsed request head, before any body bytes have been consumed.
///
/// Wraps `http::Request<()>` so the codec can hand the head to the connection
/// independently of the payload, and the connection can attach the buffered
/// body later via [`RequestHead::body`].
#[derive(Debug)]
pub struct RequestHead {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHead {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl RequestHead {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, turning the head into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }
}

impl From<Request<()>> for RequestHead {
    fn from(request: Request<()>) -> Self {
        Self { inner: request }
    }
}

impl From<Parts> for RequestHead {
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}
