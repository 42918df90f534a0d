//! Response head serialization: status line, header block, framing headers.

use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size reserved for head serialization.
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Serializes a [`ResponseHead`] plus its [`PayloadSize`] into raw bytes,
/// forcing `Content-Length` or `Transfer-Encoding` to agree with the framing
/// the payload encoder will use. Repeated header names are written as
/// repeated lines, values byte-for-byte as provided.
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match head.version() {
            Version::HTTP_11 => {
                let status = head.status();
                write!(
                    FastWrite(dst),
                    "HTTP/1.1 {} {}\r\n",
                    status.as_str(),
                    status.canonical_reason().unwrap_or("Unknown")
                )?;
            }
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }

        match payload_size {
            PayloadSize::Length(n) => {
                head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(n));
            }
            PayloadSize::Chunked => {
                head.headers_mut().insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        for (header_name, header_value) in head.headers().iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes into the already-reserved `BytesMut` without intermediate buffers.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn encodes_status_line_and_length() {
        let head = Response::builder().status(StatusCode::OK).header("x-one", "1").body(()).unwrap();
        let raw = encode(head, PayloadSize::Length(5));

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("x-one: 1\r\n"));
        assert!(raw.contains("content-length: 5\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[test]
    fn chunked_framing_sets_transfer_encoding() {
        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        let raw = encode(head, PayloadSize::Chunked);

        assert!(raw.contains("transfer-encoding: chunked\r\n"));
        assert!(!raw.contains("content-length"));
    }

    #[test]
    fn repeated_headers_repeat_lines() {
        let head = Response::builder()
            .status(StatusCode::OK)
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .body(())
            .unwrap();
        let raw = encode(head, PayloadSize::Empty);

        assert_eq!(raw.matches("set-cookie:").count(), 2);
    }
}
