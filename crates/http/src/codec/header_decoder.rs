//! Request head parsing built on `httparse`.
//!
//! Limits: at most 64 headers and an 8 KiB head section. Only HTTP/1.0 and
//! HTTP/1.1 are accepted. Framing is resolved here as well: the decoder
//! returns the [`PayloadSize`] derived from `Transfer-Encoding` and
//! `Content-Length`, which selects the payload decoder for the rest of the
//! message.

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request, header};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHead};

/// Maximum number of headers allowed in a request.
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire head section.
const MAX_HEADER_BYTES: usize = 8 * 1024;

pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Shortest parsable request is "GET / HTTP/1.1\r\n\r\n".
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parsed = httparse::Request::new(&mut headers);

        let status = parsed.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        match status {
            Status::Complete(head_len) => {
                trace!(head_len, "parsed request head");
                ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

                let version = match parsed.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    v => return Err(ParseError::InvalidVersion(v)),
                };

                let mut builder = Request::builder()
                    .method(parsed.method.ok_or(ParseError::InvalidMethod)?)
                    .uri(parsed.path.ok_or(ParseError::InvalidUri)?)
                    .version(version);

                let header_map = builder.headers_mut().ok_or(ParseError::InvalidMethod)?;
                header_map.reserve(parsed.headers.len());
                for parsed_header in parsed.headers.iter() {
                    let name = HeaderName::from_bytes(parsed_header.name.as_bytes())
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    let value = HeaderValue::from_bytes(parsed_header.value)
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    header_map.append(name, value);
                }

                // Head is fully materialized into the header map, drop its bytes.
                let _ = src.split_to(head_len);

                let head =
                    RequestHead::from(builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?);
                let payload_size = resolve_payload_size(&head)?;

                Ok(Some((head, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Resolves body framing per RFC 7230 §3.3: a chunked `Transfer-Encoding`
/// wins, then `Content-Length`, else no body.
fn resolve_payload_size(head: &RequestHead) -> Result<PayloadSize, ParseError> {
    if let Some(value) = head.headers().get(header::TRANSFER_ENCODING) {
        let value = value.to_str().map_err(|e| ParseError::invalid_header(e.to_string()))?;
        if value.split(',').any(|encoding| encoding.trim().eq_ignore_ascii_case("chunked")) {
            return Ok(PayloadSize::Chunked);
        }
        return Err(ParseError::invalid_header(format!("unsupported transfer-encoding: {value}")));
    }

    match head.headers().get(header::CONTENT_LENGTH) {
        Some(value) => {
            let length = value
                .to_str()
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ParseError::invalid_content_length(format!("{value:?}")))?;
            if length == 0 { Ok(PayloadSize::Empty) } else { Ok(PayloadSize::Length(length)) }
        }
        None => Ok(PayloadSize::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    fn decode(raw: &str) -> Result<Option<(RequestHead, PayloadSize)>, ParseError> {
        let mut buffer = BytesMut::from(raw);
        HeaderDecoder.decode(&mut buffer)
    }

    #[test]
    fn decode_simple_get() {
        let raw = indoc! {"
            GET /lifecycle?x=1 HTTP/1.1\r
            Host: example.com\r
            Accept: */*\r
            \r
        "};

        let (head, payload_size) = decode(raw).unwrap().unwrap();
        assert_eq!(head.method(), Method::GET);
        assert_eq!(head.uri().path(), "/lifecycle");
        assert_eq!(head.uri().query(), Some("x=1"));
        assert_eq!(head.headers().get("host").unwrap(), "example.com");
        assert_eq!(payload_size, PayloadSize::Empty);
    }

    #[test]
    fn decode_post_with_content_length() {
        let raw = indoc! {"
            POST /items HTTP/1.1\r
            Content-Length: 11\r
            \r
            hello world"};

        let (head, payload_size) = decode(raw).unwrap().unwrap();
        assert_eq!(head.method(), Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(11));
    }

    #[test]
    fn decode_chunked_wins_over_content_length() {
        let raw = indoc! {"
            POST /items HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
        "};

        let (_, payload_size) = decode(raw).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Chunked);
    }

    #[test]
    fn partial_head_needs_more_data() {
        assert!(decode("GET / HTTP/1.1\r\nHost: exam").unwrap().is_none());
    }

    #[test]
    fn invalid_content_length_is_rejected() {
        let raw = "POST / HTTP/1.1\r\nContent-Length: nope\r\n\r\n";
        assert!(matches!(decode(raw), Err(ParseError::InvalidContentLength { .. })));
    }
}
