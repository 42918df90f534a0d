//! Connection lifecycle: decode requests, invoke the handler, stream the
//! response, tear down on transport failure.

mod http_connection;

pub use http_connection::HttpConnection;
