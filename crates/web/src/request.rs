//! The per-request state object.
//!
//! One [`Request`] is created per inbound request and threaded mutably through
//! the whole lifecycle. It carries the immutable identity (method, path,
//! headers, raw payload) plus everything the lifecycle accumulates: auth
//! state, the active response, prerequisite results, queued cookie mutations
//! and free-form bags for application and extension state.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri, Version};
use tracing::trace;

use crate::auth::AuthState;
use crate::fault::Fault;
use crate::response::Response;
use crate::route::Route;
use crate::state::{Cookie, CookieOp};

/// Validator descriptor for the active response, consulted by the
/// conditional-request stage.
#[derive(Debug, Default, Clone)]
pub struct EntityInfo {
    pub etag: Option<String>,
    pub modified: Option<String>,
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    payload: Bytes,
    parsed_payload: Option<serde_json::Value>,
    params: HashMap<String, String>,
    route: Option<Arc<Route>>,

    pub auth: AuthState,
    response: Option<Response>,

    /// Resolved prerequisite values by assign name.
    pub pre: HashMap<String, serde_json::Value>,
    /// The wrapped responses behind `pre`, for later inspection.
    pub pre_responses: HashMap<String, Response>,

    /// Application-owned request-scoped state.
    pub app: Extensions,
    /// Extension-owned request-scoped state.
    pub plugins: Extensions,

    cookie_ops: Vec<CookieOp>,
    pub entity: EntityInfo,
}

impl Request {
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (parts, payload) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            payload,
            parsed_payload: None,
            params: HashMap::new(),
            route: None,
            auth: AuthState::default(),
            response: None,
            pre: HashMap::new(),
            pre_responses: HashMap::new(),
            app: Extensions::new(),
            plugins: Extensions::new(),
            cookie_ops: Vec::new(),
            entity: EntityInfo::default(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decoded query pairs, in document order.
    pub fn query(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|raw| serde_urlencoded::from_str::<Vec<(String, String)>>(raw).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Deserializes the query string into a typed value.
    ///
    /// ```
    /// # use serde::Deserialize;
    /// # use bytes::Bytes;
    /// # use waypoint_web::Request;
    /// #[derive(Deserialize)]
    /// struct Paging {
    ///     page: u32,
    /// }
    ///
    /// let req = Request::from_http(http::Request::builder().uri("/items?page=3").body(Bytes::new()).unwrap());
    /// let paging: Paging = req.query_as().unwrap();
    /// assert_eq!(paging.page, 3);
    /// ```
    pub fn query_as<T>(&self) -> Result<T, Fault>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        serde_urlencoded::from_str(self.uri.query().unwrap_or(""))
            .map_err(|e| Fault::bad_request(format!("Invalid query string: {e}")))
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn parsed_payload(&self) -> Option<&serde_json::Value> {
        self.parsed_payload.as_ref()
    }

    pub(crate) fn set_parsed_payload(&mut self, value: serde_json::Value) {
        self.parsed_payload = Some(value);
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub(crate) fn attach_route(&mut self, route: Arc<Route>, params: HashMap<String, String>) {
        self.route = Some(route);
        self.params = params;
    }

    /// Installs the active response, releasing the previous one.
    ///
    /// Dropping the replaced response closes any stream source behind it, so
    /// a superseded file or upstream body is never leaked.
    pub fn set_response(&mut self, response: Response) {
        if let Some(previous) = self.response.replace(response) {
            trace!(variant = previous.payload().variant(), "superseded in-flight response released");
            drop(previous);
        }
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Queues a cookie to be set on the outgoing response.
    pub fn state(&mut self, cookie: Cookie) {
        self.cookie_ops.push(CookieOp::Set(cookie));
    }

    /// Queues a cookie clear on the outgoing response.
    pub fn unstate(&mut self, name: impl Into<String>) {
        self.cookie_ops.push(CookieOp::Clear(name.into()));
    }

    pub(crate) fn absorb_cookie_ops(&mut self, ops: Vec<CookieOp>) {
        self.cookie_ops.extend(ops);
    }

    pub(crate) fn cookie_ops(&self) -> &[CookieOp] {
        &self.cookie_ops
    }
}
