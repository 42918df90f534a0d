//! Server assembly and the transport boundary.
//!
//! The builder collects routes, auth strategies, extensions, decorations and
//! transmit settings, then `build()` performs every startup-time validation
//! at once: strategy registration, extension sorting, route compilation. A
//! built server either serves TCP connections via [`Server::start`] or
//! handles synthesized requests via [`Server::inject`], which drives the
//! exact same lifecycle without a socket.

use std::convert::Infallible;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use waypoint_http::connection::HttpConnection;

use crate::auth::{AuthRegistry, AuthScheme, Credentials};
use crate::body::ResponseBody;
use crate::config::ConfigError;
use crate::ext::{ExtHandler, ExtOptions, ExtPoint, ExtRegistry};
use crate::lifecycle::Engine;
use crate::reply::{DecorationFn, Decorations};
use crate::request::Request;
use crate::route::{Router, RouteSpec};
use crate::state::Cookie;
use crate::transmit::SecurityConfig;

pub struct ServerBuilder {
    address: Option<String>,
    routes: Vec<RouteSpec>,
    strategies: Vec<(String, Arc<dyn AuthScheme>, bool)>,
    exts: Vec<(ExtPoint, Arc<dyn ExtHandler>, ExtOptions)>,
    decorations: Vec<(String, DecorationFn)>,
    auto_cookies: Vec<Cookie>,
    security: Option<SecurityConfig>,
    timeout: Option<Duration>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            address: None,
            routes: Vec::new(),
            strategies: Vec::new(),
            exts: Vec::new(),
            decorations: Vec::new(),
            auto_cookies: Vec::new(),
            security: None,
            timeout: None,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn route(mut self, spec: RouteSpec) -> Self {
        self.routes.push(spec);
        self
    }

    pub fn strategy(mut self, name: impl Into<String>, scheme: Arc<dyn AuthScheme>) -> Self {
        self.strategies.push((name.into(), scheme, false));
        self
    }

    /// Registers a strategy and makes it the default for routes without an
    /// explicit auth configuration.
    pub fn default_strategy(mut self, name: impl Into<String>, scheme: Arc<dyn AuthScheme>) -> Self {
        self.strategies.push((name.into(), scheme, true));
        self
    }

    pub fn ext(mut self, point: ExtPoint, handler: Arc<dyn ExtHandler>, options: ExtOptions) -> Self {
        self.exts.push((point, handler, options));
        self
    }

    pub fn decorate(mut self, name: impl Into<String>, method: DecorationFn) -> Self {
        self.decorations.push((name.into(), method));
        self
    }

    /// Adds a cookie set on every response that does not already set it.
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.auto_cookies.push(cookie);
        self
    }

    pub fn security(mut self, config: SecurityConfig) -> Self {
        self.security = Some(config);
        self
    }

    /// Overall per-request deadline; expiry produces a 503.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Server, ConfigError> {
        let mut auth = AuthRegistry::default();
        for (name, scheme, default) in self.strategies {
            auth.add(name, scheme, default)?;
        }

        let mut decorations = Decorations::default();
        for (name, method) in self.decorations {
            decorations.register(name, method)?;
        }

        let mut ext = ExtRegistry::default();
        for (point, handler, options) in self.exts {
            ext.add(point, handler, options)?;
        }

        let router = Router::build(self.routes, &auth)?;

        let address = match self.address {
            Some(raw) => Some(
                raw.to_socket_addrs()
                    .map_err(|source| ConfigError::BadAddress { address: raw.clone(), source })?
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };

        Ok(Server {
            engine: Arc::new(Engine {
                router,
                ext,
                auth,
                decorations: Arc::new(decorations),
                auto_cookies: self.auto_cookies,
                security: self.security,
                timeout: self.timeout,
            }),
            address,
        })
    }
}

pub struct Server {
    engine: Arc<Engine>,
    address: Option<Vec<SocketAddr>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds and serves until the process ends.
    pub async fn start(self) -> Result<(), ConfigError> {
        let address = self.address.clone().ok_or(ConfigError::MissingAddress)?;

        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            warn!("global tracing subscriber was already set");
        }

        info!("start listening at {:?}", address);
        let tcp_listener = match TcpListener::bind(address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Ok(());
            }
        };

        let handler = Arc::new(self);
        loop {
            let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer);
                match connection.process(handler).await {
                    Ok(()) => info!("finished process, connection shutdown"),
                    Err(e) => error!("service has error, cause {}, connection shutdown", e),
                }
            });
        }
    }

    /// Drives one synthesized request through the full lifecycle.
    pub async fn inject(&self, req: http::Request<Bytes>) -> http::Response<ResponseBody> {
        self.engine.dispatch(req).await
    }

    /// Like [`Server::inject`], with credentials planted ahead of the
    /// lifecycle; the auth negotiator validates them without invoking any
    /// scheme.
    pub async fn inject_with_credentials(
        &self,
        req: http::Request<Bytes>,
        credentials: Credentials,
    ) -> http::Response<ResponseBody> {
        let mut request = Request::from_http(req);
        request.auth.credentials = Some(credentials);
        self.engine.dispatch_request(request).await
    }
}

#[async_trait]
impl waypoint_http::handler::Handler for Server {
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, req: http::Request<Bytes>) -> Result<http::Response<ResponseBody>, Infallible> {
        Ok(self.engine.dispatch(req).await)
    }
}
