//! A request-lifecycle web engine on top of `waypoint-http`.
//!
//! Routing, authentication, lifecycle extension points and response
//! transmission, arranged as a single-pass pipeline per request. Handlers,
//! extensions and auth schemes each communicate their outcome through a
//! single-use reply object; the first finalized response short-circuits the
//! pass, and the pre-response point sees every outcome before the transmit
//! stages turn it into headers and bytes.
//!
//! A minimal server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypoint_web::{handler_fn, RouteSpec, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .route(RouteSpec::get(
//!             "/hello/{name}",
//!             Arc::new(handler_fn(|req, reply| {
//!                 Box::pin(async move {
//!                     let name = req.param("name").unwrap_or("world").to_owned();
//!                     Ok(reply.respond(format!("hello {name}")))
//!                 })
//!             })),
//!         ))
//!         .build()
//!         .expect("server configuration");
//!     server.start().await.expect("server start");
//! }
//! ```

pub mod auth;
pub mod body;
pub mod config;
pub mod contracts;
pub mod ext;
pub mod fault;
pub mod handler;
mod lifecycle;
pub mod reply;
pub mod request;
pub mod response;
pub mod route;
pub mod server;
pub mod state;
pub mod transmit;

pub use auth::{AuthDecision, AuthMode, AuthScheme, Credentials, Entity, PayloadAuth, RouteAuth};
pub use body::ResponseBody;
pub use config::ConfigError;
pub use ext::{ext_fn, ExtOptions, ExtPoint};
pub use fault::Fault;
pub use handler::{handler_fn, pre_fn, FailAction, Handler, Prerequisite, RoutePre};
pub use reply::{AuthReply, ExtReply, HandlerReply, Reply};
pub use request::Request;
pub use response::{ReplyValue, Response, SetPolicy};
pub use route::RouteSpec;
pub use server::{Server, ServerBuilder};
pub use state::Cookie;
pub use transmit::{CorsConfig, SecurityConfig};
