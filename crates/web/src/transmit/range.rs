//! Byte-range responses.
//!
//! Applies only to a GET that would be a 200 with a known content length and
//! no content encoding. A single satisfiable range turns into a 206 with a
//! windowed body; an unsatisfiable one into a 416 with `Content-Range:
//! bytes */<length>`. Multi-range requests are ignored and the full body is
//! sent.

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use waypoint_http::protocol::HttpError;

use crate::body::ResponseBody;
use crate::request::Request;
use crate::response::{Response, SetPolicy};

enum ParsedRange {
    Single { start: u64, end: u64 },
    Unsatisfiable,
    Ignore,
}

pub(crate) fn apply(request: &Request, response: &mut Response, body: &mut ResponseBody) {
    if request.method() != Method::GET || response.status() != StatusCode::OK {
        return;
    }
    if response.headers().contains_key(header::CONTENT_ENCODING) {
        return;
    }
    let Some(len) = body.exact_len().filter(|len| *len > 0) else {
        return;
    };
    let Some(range) = request.headers().get(header::RANGE).and_then(|value| value.to_str().ok()) else {
        return;
    };

    // If-Range with a non-matching validator means the entity changed;
    // serve the full body.
    if let Some(if_range) = request.headers().get(header::IF_RANGE).and_then(|value| value.to_str().ok()) {
        let etag = response.headers().get(header::ETAG).and_then(|value| value.to_str().ok());
        if etag != Some(if_range) {
            return;
        }
    }

    match parse(range, len) {
        ParsedRange::Ignore => {}
        ParsedRange::Unsatisfiable => {
            response.code(StatusCode::RANGE_NOT_SATISFIABLE);
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{len}")) {
                response.header(header::CONTENT_RANGE, value, SetPolicy::Set);
            }
            drop(body.take());
        }
        ParsedRange::Single { start, end } => {
            response.code(StatusCode::PARTIAL_CONTENT);
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{len}")) {
                response.header(header::CONTENT_RANGE, value, SetPolicy::Set);
            }
            let window_len = end - start + 1;
            let windowed = match body.as_once() {
                Some(bytes) => ResponseBody::once(bytes.slice(start as usize..=end as usize)),
                None => ResponseBody::stream(WindowedBody::new(body.take(), start, window_len)),
            };
            drop(body.replace(windowed));
        }
    }
}

fn parse(header_value: &str, len: u64) -> ParsedRange {
    let Some(spec) = header_value.strip_prefix("bytes=") else {
        return ParsedRange::Ignore;
    };
    if spec.contains(',') {
        return ParsedRange::Ignore;
    }

    let Some((left, right)) = spec.split_once('-') else {
        return ParsedRange::Ignore;
    };
    let (left, right) = (left.trim(), right.trim());

    let (start, end) = if left.is_empty() {
        // suffix form: last N bytes
        let Ok(suffix) = right.parse::<u64>() else {
            return ParsedRange::Ignore;
        };
        if suffix == 0 {
            return ParsedRange::Unsatisfiable;
        }
        (len.saturating_sub(suffix), len - 1)
    } else {
        let Ok(start) = left.parse::<u64>() else {
            return ParsedRange::Ignore;
        };
        let end = if right.is_empty() {
            len - 1
        } else {
            match right.parse::<u64>() {
                Ok(end) => end.min(len - 1),
                Err(_) => return ParsedRange::Ignore,
            }
        };
        (start, end)
    };

    if start >= len || start > end {
        return ParsedRange::Unsatisfiable;
    }
    ParsedRange::Single { start, end }
}

pin_project! {
    /// Skips `skip` bytes, then passes through at most `remaining` bytes.
    struct WindowedBody {
        #[pin]
        inner: ResponseBody,
        skip: u64,
        remaining: u64,
    }
}

impl WindowedBody {
    fn new(inner: ResponseBody, skip: u64, window: u64) -> Self {
        Self { inner, skip, remaining: window }
    }
}

impl Body for WindowedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            if *this.remaining == 0 {
                return Poll::Ready(None);
            }
            let frame = match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => return Poll::Ready(None),
            };
            let Ok(mut data) = frame.into_data() else {
                continue;
            };

            if *this.skip >= data.len() as u64 {
                *this.skip -= data.len() as u64;
                continue;
            }
            if *this.skip > 0 {
                data = data.slice(*this.skip as usize..);
                *this.skip = 0;
            }
            if data.len() as u64 > *this.remaining {
                data = data.slice(..*this.remaining as usize);
            }
            *this.remaining -= data.len() as u64;
            return Poll::Ready(Some(Ok(Frame::data(data))));
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}
