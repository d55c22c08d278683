/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Tokio codec for server line framing.
//!
//! Server lines end with `\r\n`; a bare `\n` is tolerated. Outbound frames
//! are written followed by `\r\n`.

use bytes::{BufMut, BytesMut};
use memchr::memchr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum line length in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Errors that can occur during codec operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A line exceeds the maximum length.
    #[error("line too long: {size} bytes exceeds maximum {max_size}")]
    LineTooLong {
        /// Bytes buffered for the line.
        size: usize,
        /// Maximum allowed length.
        max_size: usize,
    },

    /// A line is not valid UTF-8.
    #[error("line is not valid utf-8")]
    InvalidUtf8,

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Tokio codec for `\r\n`-terminated lines.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum line length in bytes, terminator excluded.
    max_line_length: usize,
    /// Bytes already scanned for a terminator.
    next_index: usize,
}

impl FrameCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            next_index: 0,
        }
    }

    /// Sets the maximum line length.
    #[must_use]
    pub const fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Returns the maximum line length.
    #[inline]
    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    fn take_line(&self, src: &mut BytesMut, end: usize, consumed: usize) -> Result<String, CodecError> {
        let line = src.split_to(consumed);
        let mut bytes = &line[..end];
        if let [rest @ .., b'\r'] = bytes {
            bytes = rest;
        }
        if bytes.len() > self.max_line_length {
            return Err(CodecError::LineTooLong {
                size: bytes.len(),
                max_size: self.max_line_length,
            });
        }
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.next_index.min(src.len());
        match memchr(b'\n', &src[start..]) {
            Some(offset) => {
                let end = start + offset;
                self.next_index = 0;
                self.take_line(src, end, end + 1).map(Some)
            }
            None => {
                // One extra byte for a pending '\r'.
                if src.len() > self.max_line_length + 1 {
                    return Err(CodecError::LineTooLong {
                        size: src.len(),
                        max_size: self.max_line_length,
                    });
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let end = src.len();
        self.take_line(src, end, end).map(Some)
    }
}

impl Encoder<&str> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

impl Encoder<String> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode(item.as_str(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_decode_lines() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"CONOK,S1,50000,5000,*\r\nPROBE\r\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("CONOK,S1,50000,5000,*")
        );
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PROBE"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_decode_incomplete() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"U,1,1,a"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"|b\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("U,1,1,a|b"));
    }

    #[test]
    fn test_codec_accepts_bare_newline() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"NOOP\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("NOOP"));
    }

    #[test]
    fn test_codec_line_too_long() {
        let mut codec = FrameCodec::new().with_max_line_length(4);
        let mut buf = BytesMut::from(&b"LOOP,0\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::LineTooLong { max_size: 4, .. })
        ));

        let mut codec = FrameCodec::new().with_max_line_length(4);
        let mut buf = BytesMut::from(&b"LOOP,0"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_codec_invalid_utf8() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\r\n"[..]);
        assert_eq!(codec.decode(&mut buf), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_codec_decode_eof_keeps_last_line() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"SYNC,3\r\nEND,41,bye"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("SYNC,3"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("END,41,bye"));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_encode() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode("wsok\r\n", &mut dst).unwrap();
        assert_eq!(&dst[..], b"wsok\r\n\r\n");
    }
}
