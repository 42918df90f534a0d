//! Route table.
//!
//! Routes are declared as specs and compiled once at server build time: the
//! path goes into a radix router, the auth configuration is resolved against
//! the registered strategies, and everything per-route (prerequisite groups,
//! cors, cache ttl) is frozen behind an `Arc` shared by every matching
//! request.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use tracing::info;

use crate::auth::{AuthRegistry, RouteAuth};
use crate::config::ConfigError;
use crate::handler::{Handler, RoutePre};
use crate::transmit::CorsConfig;

type InnerRouter<T> = matchit::Router<T>;

/// A compiled route.
pub struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) auth: Option<RouteAuth>,
    pub(crate) pre: Vec<Vec<RoutePre>>,
    pub(crate) cors: Option<CorsConfig>,
    pub(crate) ttl_ms: Option<u64>,
    pub(crate) parse_payload: bool,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn auth(&self) -> Option<&RouteAuth> {
        self.auth.as_ref()
    }

    pub fn cors(&self) -> Option<&CorsConfig> {
        self.cors.as_ref()
    }

    pub fn ttl_ms(&self) -> Option<u64> {
        self.ttl_ms
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("auth", &self.auth)
            .finish()
    }
}

/// A route declaration, compiled by the server builder.
pub struct RouteSpec {
    method: Method,
    path: String,
    handler: Arc<dyn Handler>,
    auth: Option<RouteAuth>,
    no_auth: bool,
    pre: Vec<Vec<RoutePre>>,
    cors: Option<CorsConfig>,
    ttl_ms: Option<u64>,
    parse_payload: bool,
}

impl RouteSpec {
    pub fn new(method: Method, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            path: path.into(),
            handler,
            auth: None,
            no_auth: false,
            pre: Vec::new(),
            cors: None,
            ttl_ms: None,
            parse_payload: true,
        }
    }

    pub fn get(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(Method::DELETE, path, handler)
    }

    pub fn auth(mut self, auth: RouteAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Opts out of the server default strategy.
    pub fn no_auth(mut self) -> Self {
        self.no_auth = true;
        self
    }

    /// Adds one prerequisite group; members of a group run concurrently,
    /// groups run in declaration order.
    pub fn pre_group(mut self, group: Vec<RoutePre>) -> Self {
        self.pre.push(group);
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Disables body parsing for this route; the raw bytes stay available.
    pub fn raw_payload(mut self) -> Self {
        self.parse_payload = false;
        self
    }

    fn compile(self, auth_registry: &AuthRegistry) -> Result<Route, ConfigError> {
        let auth = if self.no_auth {
            None
        } else {
            match self.auth {
                Some(mut auth) => {
                    auth.strategies = auth_registry.resolve(&auth.strategies).map_err(|err| {
                        ConfigError::InvalidRoute { path: self.path.clone(), reason: err.to_string() }
                    })?;
                    Some(auth)
                }
                // Routes without an explicit configuration pick up the server
                // default strategy, when one exists.
                None => auth_registry.default_strategy().map(|name| RouteAuth::required().strategy(name)),
            }
        };

        Ok(Route {
            method: self.method,
            path: self.path,
            handler: self.handler,
            auth,
            pre: self.pre,
            cors: self.cors,
            ttl_ms: self.ttl_ms,
            parse_payload: self.parse_payload,
        })
    }
}

pub struct Router {
    inner: InnerRouter<HashMap<Method, Arc<Route>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    pub(crate) fn build(specs: Vec<RouteSpec>, auth_registry: &AuthRegistry) -> Result<Self, ConfigError> {
        let mut by_path: HashMap<String, HashMap<Method, Arc<Route>>> = HashMap::new();
        for spec in specs {
            let path = spec.path.clone();
            let route = spec.compile(auth_registry)?;
            info!(method = %route.method, path = %route.path, "route registered");
            let methods = by_path.entry(path.clone()).or_default();
            if methods.insert(route.method.clone(), Arc::new(route)).is_some() {
                return Err(ConfigError::InvalidRoute { path, reason: "duplicate method".to_owned() });
            }
        }

        let mut inner = InnerRouter::new();
        for (path, methods) in by_path {
            inner.insert(path.clone(), methods).map_err(|err| ConfigError::InvalidRoute {
                path,
                reason: err.to_string(),
            })?;
        }
        Ok(Self { inner })
    }

    /// Matches method and path; no match is a 404, method mismatch included.
    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let matched = self.inner.at(path).ok()?;
        let route = matched.value.get(method)?;
        let params = matched
            .params
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();
        Some((Arc::clone(route), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn handler() -> Arc<dyn Handler> {
        Arc::new(handler_fn(|_req, reply| Box::pin(async move { Ok(reply.respond("ok")) })))
    }

    #[test]
    fn lookup_matches_method_and_params() {
        let registry = AuthRegistry::default();
        let router = Router::build(
            vec![
                RouteSpec::get("/widgets/{id}", handler()),
                RouteSpec::post("/widgets/{id}", handler()),
            ],
            &registry,
        )
        .unwrap();

        let (route, params) = router.lookup(&Method::GET, "/widgets/42").unwrap();
        assert_eq!(route.method(), &Method::GET);
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        assert!(router.lookup(&Method::DELETE, "/widgets/42").is_none());
        assert!(router.lookup(&Method::GET, "/missing").is_none());
    }

    #[test]
    fn duplicate_method_on_one_path_is_rejected() {
        let registry = AuthRegistry::default();
        let err = Router::build(
            vec![RouteSpec::get("/w", handler()), RouteSpec::get("/w", handler())],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoute { .. }));
    }

    #[test]
    fn unknown_strategy_fails_route_compilation() {
        let registry = AuthRegistry::default();
        let err = Router::build(
            vec![RouteSpec::get("/w", handler()).auth(RouteAuth::required().strategy("ghost"))],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoute { .. }));
    }
}
