/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Percent encoding of parameter values and inbound free-text tokens.
//!
//! Outbound values escape the characters that would break the
//! `name=value&name=value` grammar or the line framing. Inbound tokens are
//! decoded only when they contain a `%`.

use pushwire_core::error::DecodeError;
use std::borrow::Cow;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Returns true if the byte must be escaped in a parameter value.
#[inline]
const fn needs_escape(b: u8) -> bool {
    matches!(b, b'%' | b'&' | b'=' | b'+' | b'\r' | b'\n') || b >= 0x80
}

/// Percent-encodes a parameter value.
///
/// Values that need no escaping are returned borrowed.
///
/// # Example
/// ```
/// use pushwire_protocol::percent::encode;
///
/// assert_eq!(encode("a&b"), "a%26b");
/// assert_eq!(encode("plain"), "plain");
/// ```
#[must_use]
pub fn encode(value: &str) -> Cow<'_, str> {
    if !value.bytes().any(needs_escape) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for b in value.bytes() {
        if needs_escape(b) {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        } else {
            out.push(b as char);
        }
    }
    Cow::Owned(out)
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes a percent-encoded token.
///
/// # Errors
/// Returns `DecodeError::InvalidEncoding` for truncated escapes, non-hex
/// digits, or escapes producing invalid UTF-8.
pub fn decode(token: &str) -> Result<Cow<'_, str>, DecodeError> {
    if memchr::memchr(b'%', token.as_bytes()).is_none() {
        return Ok(Cow::Borrowed(token));
    }
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_value);
            let lo = bytes.get(i + 2).copied().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                _ => return Err(DecodeError::InvalidEncoding(token.to_string())),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map(Cow::Owned)
        .map_err(|_| DecodeError::InvalidEncoding(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reserved() {
        assert_eq!(encode("a=b&c+d%"), "a%3Db%26c%2Bd%25");
        assert_eq!(encode("line\r\nnext"), "line%0D%0Anext");
    }

    #[test]
    fn test_encode_non_ascii() {
        assert_eq!(encode("é"), "%C3%A9");
    }

    #[test]
    fn test_encode_borrows_plain() {
        assert!(matches!(encode("hello world"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("a%3Db%26c").unwrap(), "a=b&c");
        assert_eq!(decode("%C3%A9").unwrap(), "é");
        assert_eq!(decode("plain").unwrap(), "plain");
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(decode("bad%2"), Err(DecodeError::InvalidEncoding(_))));
        assert!(matches!(decode("bad%zz"), Err(DecodeError::InvalidEncoding(_))));
        assert!(matches!(decode("%FF"), Err(DecodeError::InvalidEncoding(_))));
    }
}
