//! Frame codec for multiplexed stdout/stderr streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use dockyard_core::CodecError;

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StdStream {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StdStream {
    /// Map a header selector byte to a stream.
    pub fn from_selector(selector: u8) -> Result<Self, CodecError> {
        match selector {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(CodecError::UnknownStream(other)),
        }
    }

    #[must_use]
    pub fn selector(self) -> u8 {
        self as u8
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StdStream,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(stream: StdStream, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

/// Codec for the 8-byte-header multiplexed stream format.
///
/// ## Example
///
/// ```rust
/// use bytes::BytesMut;
/// use dockyard_codec::{MuxCodec, StdStream};
/// use tokio_util::codec::Decoder;
///
/// let mut codec = MuxCodec::new();
/// let mut buf = BytesMut::new();
///
/// codec.encode_slice(StdStream::Stderr, b"oops", &mut buf).unwrap();
///
/// let frame = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(frame.stream, StdStream::Stderr);
/// assert_eq!(&frame.payload[..], b"oops");
/// ```
#[derive(Debug, Clone)]
pub struct MuxCodec {
    max_frame_size: usize,
}

impl MuxCodec {
    /// Create a new codec with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum payload size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    #[inline]
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a payload for `stream` into the buffer.
    pub fn encode_slice(
        &self,
        stream: StdStream,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let len = payload.len();
        let too_large = CodecError::FrameTooLarge {
            size: len,
            max: self.max_frame_size,
        };
        if len > self.max_frame_size {
            return Err(too_large);
        }
        let wire_len = u32::try_from(len).map_err(|_| too_large)?;

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(stream.selector());
        dst.put_bytes(0, 3);
        dst.put_u32(wire_len);
        dst.put_slice(payload);

        Ok(())
    }

    /// Parse a header, returning the stream and the payload length.
    fn header(&self, src: &[u8]) -> Result<(StdStream, usize), CodecError> {
        let stream = StdStream::from_selector(src[0])?;
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        Ok((stream, len))
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MuxCodec {
    type Item = Frame;
    type Error = CodecError;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let (stream, len) = self.header(src)?;

        let total_len = HEADER_LEN + len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        Ok(Some(Frame { stream, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // Whatever is left cannot complete a frame.
        let expected = if src.len() < HEADER_LEN {
            HEADER_LEN
        } else {
            HEADER_LEN + self.header(src)?.1
        };
        Err(CodecError::Truncated {
            expected,
            actual: src.len(),
        })
    }
}

impl Encoder<Frame> for MuxCodec {
    type Error = CodecError;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_slice(item.stream, &item.payload, dst)
    }
}
