use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::header::EXPECT;
use http::{Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHead, ResponseHead, SendError};

use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error};

/// Default cap on a buffered request body.
const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// One HTTP/1.1 connection.
///
/// `HttpConnection` drives the full request/response exchange: it decodes a
/// request head, answers `Expect: 100-continue`, collects the request payload
/// into `Bytes` (the lifecycle engine consumes buffered payloads), invokes the
/// handler, and streams the response body out. Each request ends the response
/// exactly once; a failure while writing is logged and tears down only this
/// connection.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    max_body_bytes: u64,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Serves requests until the peer closes the connection or an error makes
    /// it unusable.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Header((header, _payload_size)))) => {
                    self.serve_one(header, handler.as_ref()).await?;
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received body frame while expecting a request head");
                    let error_response = build_error_response(StatusCode::BAD_REQUEST);
                    self.write_response(error_response).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't decode next request");
                    let status = match &e {
                        ParseError::TooLargeHeader { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                        _ => StatusCode::BAD_REQUEST,
                    };
                    self.write_response(build_error_response(status)).await?;
                    return Err(e.into());
                }

                None => {
                    debug!("no more requests, closing connection");
                    return Ok(());
                }
            }
        }
    }

    async fn serve_one<H>(&mut self, head: RequestHead, handler: &H) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        if wants_continue(&head) {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            debug!("sent 100-continue interim response");
        }

        let body = match self.collect_body().await {
            Ok(body) => body,
            Err(e @ ParseError::TooLargeBody { .. }) => {
                error!(cause = %e, "request body over limit");
                self.write_response(build_error_response(StatusCode::PAYLOAD_TOO_LARGE)).await?;
                return Err(e.into());
            }
            Err(e) => {
                self.write_response(build_error_response(StatusCode::BAD_REQUEST)).await?;
                return Err(e.into());
            }
        };

        let request = head.body(body);
        let response_result = handler.call(request).await;

        match response_result {
            Ok(response) => self.write_response(response).await,
            Err(e) => {
                error!(cause = %e.into(), "handler failed without producing a response");
                self.write_response(build_error_response(StatusCode::INTERNAL_SERVER_ERROR)).await
            }
        }
    }

    /// Drains the current request's payload frames into one buffer.
    async fn collect_body(&mut self) -> Result<Bytes, ParseError> {
        let mut collected = BytesMut::new();
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(chunk)))) => {
                    if (collected.len() + chunk.len()) as u64 > self.max_body_bytes {
                        return Err(ParseError::too_large_body(
                            (collected.len() + chunk.len()) as u64,
                            self.max_body_bytes,
                        ));
                    }
                    collected.extend_from_slice(&chunk);
                }
                Some(Ok(Message::Payload(PayloadItem::Eof))) => return Ok(collected.freeze()),
                Some(Ok(Message::Header(_))) => {
                    return Err(ParseError::invalid_body("request head arrived inside a payload"));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(ParseError::invalid_body("connection closed mid-body")),
            }
        }
    }

    async fn write_response<T>(&mut self, response: Response<T>) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let (header_parts, mut body) = response.into_parts();

        let payload_size = {
            let size_hint = body.size_hint();
            match size_hint.exact() {
                Some(0) => PayloadSize::Empty,
                Some(length) => PayloadSize::Length(length),
                None => PayloadSize::Chunked,
            }
        };

        let header = Message::<_, T::Data>::Header((ResponseHead::from_parts(header_parts, ()), payload_size));
        if payload_size.is_empty() {
            // flush now, there will be no payload frames
            self.framed_write.send(header).await?;
        } else {
            self.framed_write.feed(header).await?;
        }

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let payload_item = frame
                        .into_data()
                        .map(PayloadItem::Chunk)
                        .map_err(|_e| SendError::invalid_body("response produced a non-data frame"))?;

                    self.framed_write.send(Message::Payload(payload_item)).await?;
                }
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => {
                    self.framed_write.feed(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    SinkExt::<Message<(ResponseHead, PayloadSize), T::Data>>::flush(&mut self.framed_write)
                        .await
                        .map_err(|e| SendError::io(io_error(e)))?;
                    return Ok(());
                }
            }
        }
    }
}

fn io_error(e: SendError) -> std::io::Error {
    match e {
        SendError::Io { source } => source,
        other => std::io::Error::other(other.to_string()),
    }
}

fn wants_continue(head: &RequestHead) -> bool {
    head.headers().get(EXPECT).map(|value| value.as_bytes().starts_with(b"100-")).unwrap_or(false)
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status_code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use http::Request;
    use indoc::indoc;
    use std::convert::Infallible;
    use http_body_util::Full;

    async fn echo(req: Request<Bytes>) -> Result<Response<Full<Bytes>>, Infallible> {
        let body = req.into_body();
        Ok(Response::new(Full::new(body)))
    }

    #[tokio::test]
    async fn serves_request_and_echoes_body() {
        let raw = indoc! {"
            POST /echo HTTP/1.1\r
            Content-Length: 5\r
            \r
            hello"};

        let (mut client, server) = tokio::io::duplex(4 * 1024);
        let task = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            HttpConnection::new(reader, writer).process(Arc::new(make_handler(echo))).await
        });

        use tokio::io::AsyncReadExt;
        tokio::io::AsyncWriteExt::write_all(&mut client, raw.as_bytes()).await.unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut client).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8(received).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hello"));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let raw = indoc! {"
            POST /echo HTTP/1.1\r
            Content-Length: 6\r
            \r
            toobig"};

        let (mut client, server) = tokio::io::duplex(4 * 1024);
        let task = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            HttpConnection::new(reader, writer)
                .with_max_body_bytes(4)
                .process(Arc::new(make_handler(echo)))
                .await
        });

        use tokio::io::AsyncReadExt;
        tokio::io::AsyncWriteExt::write_all(&mut client, raw.as_bytes()).await.unwrap();
        tokio::io::AsyncWriteExt::shutdown(&mut client).await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8(received).unwrap();

        assert!(text.starts_with("HTTP/1.1 413"));
        assert!(task.await.unwrap().is_err());
    }
}
