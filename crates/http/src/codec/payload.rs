//! Payload framing: fixed-length and chunked decoding/encoding.
//!
//! A [`PayloadDecoder`] is selected from the request head's [`PayloadSize`]
//! and yields [`PayloadItem`] chunks until `Eof`. A [`PayloadEncoder`] is the
//! mirror image for the response direction.

use std::io::Write;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::protocol::{ParseError, PayloadItem, PayloadSize, SendError};

pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    Empty { finished: bool },
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(n) => Self::Length(LengthDecoder { remaining: n }),
            PayloadSize::Chunked => Self::Chunked(ChunkedDecoder { state: ChunkState::Size }),
            PayloadSize::Empty => Self::Empty { finished: false },
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            Self::Length(decoder) => decoder.decode(src),
            Self::Chunked(decoder) => decoder.decode(src),
            Self::Empty { finished } => {
                if *finished {
                    Ok(None)
                } else {
                    *finished = true;
                    Ok(Some(PayloadItem::Eof))
                }
            }
        }
    }
}

pub struct LengthDecoder {
    remaining: u64,
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let take = src.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let chunk = src.split_to(take).freeze();
        self.remaining -= chunk.len() as u64;
        Ok(Some(PayloadItem::Chunk(chunk)))
    }
}

enum ChunkState {
    /// Expecting a chunk-size line.
    Size,
    /// Reading chunk data, `remaining` bytes left.
    Data { remaining: usize },
    /// Expecting the CRLF that terminates a data chunk.
    DataEnd,
    /// Last chunk seen, consuming (and discarding) trailers until blank line.
    Trailer,
    Done,
}

pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &mut self.state {
                ChunkState::Size => {
                    let Some(line) = split_line(src) else { return Ok(None) };
                    let size_text = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_text, 16)
                        .map_err(|_| ParseError::invalid_body(format!("bad chunk size: {size_text:?}")))?;
                    self.state = if size == 0 { ChunkState::Trailer } else { ChunkState::Data { remaining: size } };
                }
                ChunkState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = src.len().min(*remaining);
                    let chunk = src.split_to(take).freeze();
                    *remaining -= chunk.len();
                    if *remaining == 0 {
                        self.state = ChunkState::DataEnd;
                    }
                    return Ok(Some(PayloadItem::Chunk(chunk)));
                }
                ChunkState::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let crlf = src.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(ParseError::invalid_body("chunk data not terminated by CRLF"));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line) = split_line(src) else { return Ok(None) };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                        return Ok(Some(PayloadItem::Eof));
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }
}

/// Splits one CRLF-terminated line off the buffer, without the CRLF.
fn split_line(src: &mut BytesMut) -> Option<String> {
    let position = src.windows(2).position(|window| window == b"\r\n")?;
    let line = src.split_to(position);
    let _ = src.split_to(2);
    Some(String::from_utf8_lossy(&line).into_owned())
}

pub enum PayloadEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    Empty { finished: bool },
}

impl PayloadEncoder {
    pub fn fix_length(length: u64) -> Self {
        Self::Length(LengthEncoder { remaining: length })
    }

    pub fn chunked() -> Self {
        Self::Chunked(ChunkedEncoder { eof: false })
    }

    pub fn empty() -> Self {
        Self::Empty { finished: false }
    }

    pub fn is_finish(&self) -> bool {
        match self {
            Self::Length(encoder) => encoder.remaining == 0,
            Self::Chunked(encoder) => encoder.eof,
            Self::Empty { finished } => *finished,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Self::Length(encoder) => encoder.encode(item, dst),
            Self::Chunked(encoder) => encoder.encode(item, dst),
            Self::Empty { finished } => {
                if item.is_chunk() {
                    warn!("dropping payload chunk for an empty-framed response");
                }
                *finished = true;
                Ok(())
            }
        }
    }
}

pub struct LengthEncoder {
    remaining: u64,
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                if (bytes.remaining() as u64) > self.remaining {
                    return Err(SendError::invalid_body("body longer than declared content-length"));
                }
                dst.extend_from_slice(bytes.chunk());
                self.remaining -= bytes.remaining() as u64;
                Ok(())
            }
            PayloadItem::Eof => {
                if self.remaining != 0 {
                    warn!(remaining = self.remaining, "body ended short of declared content-length");
                    self.remaining = 0;
                }
                Ok(())
            }
        }
    }
}

pub struct ChunkedEncoder {
    eof: bool,
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                write!(helper::Writer(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                dst.extend_from_slice(bytes.chunk());
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn length_decoder_yields_chunks_then_eof() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Length(5));
        let mut buffer = BytesMut::from(&b"hello world"[..]);

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        // trailing bytes belong to the next message
        assert_eq!(&buffer[..], b" world");
    }

    #[test]
    fn chunked_decoder_round_trip() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Chunked);
        let mut buffer = BytesMut::from(&b"4\r\nwayp\r\n3\r\noin\r\n0\r\n\r\n"[..]);

        let mut collected = Vec::new();
        loop {
            match decoder.decode(&mut buffer).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => collected.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => break,
                None => panic!("decoder stalled"),
            }
        }
        assert_eq!(collected, b"waypoin");
    }

    #[test]
    fn chunked_decoder_waits_for_more_data() {
        let mut decoder = PayloadDecoder::from(PayloadSize::Chunked);
        let mut buffer = BytesMut::from(&b"4\r\nwa"[..]);

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"wa"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn chunked_encoder_frames_and_terminates() {
        let mut encoder = PayloadEncoder::chunked();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"3\r\nabc\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
    }

    #[test]
    fn length_encoder_rejects_overlong_body() {
        let mut encoder = PayloadEncoder::fix_length(2);
        let mut dst = BytesMut::new();

        let result = encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"abc")), &mut dst);
        assert!(matches!(result, Err(SendError::InvalidBody { .. })));
    }
}
