//! Streaming codec for HTTP/1.1 messages.
//!
//! Decoding and encoding are both two-phase state machines: a head phase
//! (request line / status line plus headers) followed by a payload phase
//! selected from the framing headers (`Content-Length`, `Transfer-Encoding`).
//!
//! - [`RequestDecoder`]: decodes request heads and payload chunks
//! - [`ResponseEncoder`]: encodes response heads and payload chunks

mod header_decoder;
mod header_encoder;
mod payload;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

pub(crate) use header_decoder::HeaderDecoder;
pub(crate) use header_encoder::HeaderEncoder;
pub(crate) use payload::{PayloadDecoder, PayloadEncoder};
