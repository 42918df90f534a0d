//! The HTTP/1.1 transport for the waypoint web framework.
//!
//! This crate owns everything below the request lifecycle: reading bytes off a
//! connection, parsing them into request heads and payloads, and writing a
//! finished response back with correct framing. The framework above it only
//! sees the [`handler::Handler`] trait.
//!
//! # Architecture
//!
//! - [`connection`]: per-connection processing loop and teardown
//! - [`protocol`]: request/response head types, frame model, error types
//! - [`codec`]: request decoding and response encoding
//! - [`handler`]: the seam the framework implements
//!
//! A connection decodes one request at a time, buffers its payload, calls the
//! handler, and streams the response body out. The connection is ended exactly
//! once per failed request; socket-level write failures tear down only that
//! connection.
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use http_body_util::Full;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn, Level};
//! use tracing_subscriber::FmtSubscriber;
//! use waypoint_http::connection::HttpConnection;
//! use waypoint_http::handler::make_handler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     info!(port = 8080, "start listening");
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler).await {
//!                 error!(cause = %e, "connection ended with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<Bytes>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     info!(path = request.uri().path(), "incoming request");
//!     let body = "Hello World!\r\n";
//!     let response = Response::builder()
//!         .status(StatusCode::OK)
//!         .header(http::header::CONTENT_LENGTH, body.len())
//!         .body(Full::new(Bytes::from_static(body.as_bytes())))
//!         .expect("static response parts are valid");
//!     Ok(response)
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

#[macro_export]
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}
