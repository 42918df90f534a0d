//! Response compression.
//!
//! Negotiates an encoding from `Accept-Encoding` when the content type is
//! compressible and nothing upstream already set a content encoding. A
//! buffered body is compressed in place; a streaming body is wrapped in an
//! incremental encoder. Content-Length becomes unknown after compression,
//! so the header is stripped and `Vary: Accept-Encoding` appended.

use bytes::{Buf, Bytes, BytesMut};
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http::header::{self, HeaderValue};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::trace;
use waypoint_http::protocol::{HttpError, SendError};

use crate::body::ResponseBody;
use crate::request::Request;
use crate::response::{Response, SetPolicy};

/// Bodies at or below this size are not worth compressing.
const MIN_COMPRESS_BYTES: u64 = 1024;

pub(crate) fn apply(request: &Request, response: &mut Response, body: &mut ResponseBody) {
    if !response.status().is_success() || response.status() == http::StatusCode::NO_CONTENT {
        return;
    }
    if response.headers().contains_key(header::CONTENT_ENCODING) {
        return;
    }
    if body.is_empty() {
        return;
    }
    if let Some(len) = body.exact_len()
        && len <= MIN_COMPRESS_BYTES
    {
        return;
    }

    let compressible = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_compressible);
    if !compressible {
        return;
    }

    let Some(accept) = request.headers().get(header::ACCEPT_ENCODING).and_then(|value| value.to_str().ok())
    else {
        return;
    };
    let Some(encoding) = negotiate(accept) else {
        return;
    };

    let encoded = match body.as_once() {
        Some(bytes) => {
            let mut encoder = Encoder::new(encoding);
            match encoder.write(bytes).and_then(|()| encoder.finish()) {
                Ok(compressed) => ResponseBody::once(compressed),
                Err(err) => {
                    trace!(%err, "compression failed, sending identity body");
                    return;
                }
            }
        }
        None => ResponseBody::stream(EncodedBody::new(body.take(), Encoder::new(encoding))),
    };
    drop(body.replace(encoded));

    response.headers_mut().remove(header::CONTENT_LENGTH);
    response.header(header::CONTENT_ENCODING, HeaderValue::from_static(encoding.token()), SetPolicy::Set);
    response.header(header::VARY, HeaderValue::from_static("accept-encoding"), SetPolicy::Append);
}

fn is_compressible(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or(content_type).trim();
    essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/javascript"
        || essence == "application/xml"
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    fn token(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Brotli),
            _ => None,
        }
    }
}

/// Picks the supported encoding with the highest q-value; ties break toward
/// brotli, then gzip, then deflate.
fn negotiate(accept_encoding: &str) -> Option<Encoding> {
    let mut best: Option<(Encoding, f32)> = None;
    for entry in accept_encoding.split(',') {
        let mut parts = entry.split(';');
        let token = parts.next()?.trim();
        let q = parts
            .find_map(|param| param.trim().strip_prefix("q="))
            .and_then(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);
        if q <= 0.0 {
            continue;
        }
        let Some(encoding) = Encoding::from_token(token) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, current_q)) => q > current_q || (q == current_q && preference(encoding) > preference(current)),
        };
        if better {
            best = Some((encoding, q));
        }
    }
    best.map(|(encoding, _)| encoding)
}

fn preference(encoding: Encoding) -> u8 {
    match encoding {
        Encoding::Brotli => 2,
        Encoding::Gzip => 1,
        Encoding::Deflate => 0,
    }
}

struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), Compression::best())),
            Encoding::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::best())),
            Encoding::Brotli => Self::Br(Box::new(brotli::CompressorWriter::new(Writer::new(), 32 * 1024, 3, 22))),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        }
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    fn finish(self) -> Result<Bytes, io::Error> {
        match self {
            Self::Gzip(encoder) => Ok(encoder.finish()?.buf.freeze()),
            Self::Deflate(encoder) => Ok(encoder.finish()?.buf.freeze()),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner().buf.freeze())
            }
        }
    }
}

pin_project! {
    /// Feeds inner body frames through the encoder, emitting compressed
    /// chunks as they accumulate and the encoder tail at end of stream.
    struct EncodedBody {
        #[pin]
        inner: ResponseBody,
        encoder: Option<Encoder>,
    }
}

impl EncodedBody {
    fn new(inner: ResponseBody, encoder: Encoder) -> Self {
        Self { inner, encoder: Some(encoder) }
    }
}

impl Body for EncodedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            if this.encoder.is_none() {
                return Poll::Ready(None);
            }

            return match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    let encoder = this.encoder.as_mut().unwrap();
                    if let Err(err) = encoder.write(data.chunk()) {
                        return Poll::Ready(Some(Err(SendError::from(err).into())));
                    }
                    let bytes = encoder.take();
                    if bytes.is_empty() {
                        continue;
                    }
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Some(Err(err)) => Poll::Ready(Some(Err(err))),
                None => {
                    // drain the encoder exactly once
                    let bytes = match this.encoder.take().unwrap().finish() {
                        Ok(bytes) => bytes,
                        Err(err) => return Poll::Ready(Some(Err(SendError::from(err).into()))),
                    };
                    if bytes.is_empty() { Poll::Ready(None) } else { Poll::Ready(Some(Ok(Frame::data(bytes)))) }
                }
            };
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use flate2::read::GzDecoder;
    use http::Method;
    use std::io::Read;

    fn request(accept_encoding: &str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(Method::GET)
                .uri("/doc")
                .header("accept-encoding", accept_encoding)
                .body(Bytes::new())
                .unwrap(),
        )
    }

    fn large_text_response() -> (Response, ResponseBody) {
        let mut response = Response::wrap("placeholder");
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/html; charset=utf-8".parse().unwrap());
        let body = ResponseBody::once(Bytes::from("lifecycle ".repeat(500)));
        (response, body)
    }

    #[test]
    fn negotiation_honors_q_values() {
        assert_eq!(negotiate("gzip, deflate"), Some(Encoding::Gzip));
        assert_eq!(negotiate("gzip;q=0.5, deflate"), Some(Encoding::Deflate));
        assert_eq!(negotiate("gzip;q=0, identity"), None);
        assert_eq!(negotiate("br, gzip"), Some(Encoding::Brotli));
        assert_eq!(negotiate("zstd"), None);
    }

    #[test]
    fn compressible_types() {
        assert!(is_compressible("text/html; charset=utf-8"));
        assert!(is_compressible("application/json"));
        assert!(is_compressible("application/hal+json"));
        assert!(!is_compressible("image/png"));
        assert!(!is_compressible("application/octet-stream"));
    }

    #[test]
    fn gzip_round_trip_on_buffered_body() {
        let req = request("gzip");
        let (mut response, mut body) = large_text_response();

        apply(&req, &mut response, &mut body);

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert!(!response.headers().contains_key(header::CONTENT_LENGTH));
        assert_eq!(response.headers().get(header::VARY).unwrap(), "accept-encoding");

        let compressed = body.as_once().unwrap();
        let mut decoder = GzDecoder::new(compressed.clone().reader());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, "lifecycle ".repeat(500));
    }

    #[test]
    fn small_bodies_are_left_alone() {
        let req = request("gzip");
        let mut response = Response::wrap("placeholder");
        response.headers_mut().insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
        let mut body = ResponseBody::once(Bytes::from_static(b"tiny"));

        apply(&req, &mut response, &mut body);
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
    }

    #[test]
    fn preexisting_encoding_is_untouched() {
        let req = request("gzip");
        let (mut response, mut body) = large_text_response();
        response.headers_mut().insert(header::CONTENT_ENCODING, "identity".parse().unwrap());

        apply(&req, &mut response, &mut body);
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "identity");
    }
}
