use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use std::pin::Pin;
use std::task::{Context, Poll};
use waypoint_http::protocol::HttpError;

/// The byte-producing side of a marshalled response.
///
/// Either a single buffered chunk or a boxed stream. Dropping a stream body
/// releases whatever source backs it; the transmit pipeline relies on this
/// when a response is replaced before it is sent.
pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(BoxBody<Bytes, HttpError>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        Self { inner: Kind::Once(Some(bytes)) }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = HttpError> + Send + Sync + 'static,
    {
        Self { inner: Kind::Stream(BoxBody::new(body)) }
    }

    pub fn is_empty(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(_) => false,
        }
    }

    /// Exact byte length, if known without consuming the body.
    pub fn exact_len(&self) -> Option<u64> {
        self.size_hint().exact()
    }

    /// The buffered chunk, if this body is a single chunk.
    pub fn as_once(&self) -> Option<&Bytes> {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.as_ref(),
            Kind::Stream(_) => None,
        }
    }

    /// Replaces this body, returning the old one.
    pub fn replace(&mut self, new_body: ResponseBody) -> ResponseBody {
        std::mem::replace(self, new_body)
    }

    /// Takes this body, leaving an empty one behind.
    pub fn take(&mut self) -> ResponseBody {
        self.replace(ResponseBody::empty())
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        if value.is_empty() { Self::empty() } else { Self::once(Bytes::from(value)) }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        if value.is_empty() { Self::empty() } else { Self::once(value) }
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        if value.is_empty() { Self::empty() } else { Self::once(value.as_bytes().into()) }
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let kind = &mut self.get_mut().inner;
        match kind {
            Kind::Once(option_bytes) if option_bytes.is_none() => Poll::Ready(None),
            Kind::Once(option_bytes) => Poll::Ready(Some(Ok(Frame::data(option_bytes.take().unwrap())))),
            Kind::Stream(box_body) => {
                let pin = Pin::new(box_body);
                pin.poll_frame(cx)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Kind::Once(option_bytes) => {
                f.debug_tuple("ResponseBody::Once").field(&option_bytes.as_ref().map(Bytes::len)).finish()
            }
            Kind::Stream(_) => f.debug_tuple("ResponseBody::Stream").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use http_body_util::{BodyExt, StreamBody};
    use std::io;
    use waypoint_http::protocol::ParseError;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<ResponseBody>();
    }

    #[tokio::test]
    async fn string_body_yields_once() {
        let mut body = ResponseBody::from("lifecycle".to_string());

        assert_eq!(body.exact_len(), Some(9));
        assert!(!body.is_empty());

        let bytes = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(bytes, Bytes::from("lifecycle"));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn empty_body_has_zero_hint() {
        let mut body = ResponseBody::from("");
        assert!(body.is_empty());
        assert_eq!(body.exact_len(), Some(0));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn stream_body_yields_all_chunks() {
        let chunks: Vec<Result<_, io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"a"))),
            Ok(Frame::data(Bytes::from_static(b"b"))),
        ];
        let stream = futures::stream::iter(chunks).map_err(|err| ParseError::io(err).into());
        let mut body = ResponseBody::stream(StreamBody::new(stream));

        assert!(body.exact_len().is_none());
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), b"a");
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), b"b");
        assert!(body.frame().await.is_none());
    }
}
