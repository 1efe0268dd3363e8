use std::{io, io::Write, net::TcpStream};

use thiserror::Error;

/// Cap on the decoded preamble. Decoding stops here, so the longest
/// accepted preamble is one byte shorter.
pub const MAX_PREAMBLE: usize = 64;

/// The watch request the `gpsd` shortcut sends instead of a configured
/// preamble.
pub const GPSD_WATCH: &str = "?WATCH={\"enable\":true,\"nmea\":true}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreambleError {
    #[error("preamble is too long: max {} bytes", MAX_PREAMBLE - 1)]
    TooLong,
    #[error("truncated escape at byte {0}")]
    Truncated(usize),
    #[error("invalid escape at byte {0}")]
    BadEscape(usize),
}

/// Handshake bytes written to the peer after every successful connect.
/// Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    bytes: Vec<u8>,
}

impl Preamble {
    /// Decodes a C-escape-style literal. Recognised escapes are the
    /// single-character ones (`\a \b \f \n \r \t \v \' \" \?`), `\xHH`
    /// with exactly two hex digits, and exactly three octal digits whose
    /// value fits a byte. A backslash before a non-octal character
    /// passes that character through unchanged.
    pub fn parse(literal: &str) -> Result<Self, PreambleError> {
        let src = literal.as_bytes();
        let mut bytes = Vec::with_capacity(src.len().min(MAX_PREAMBLE));
        let mut i = 0;

        while i < src.len() {
            if bytes.len() == MAX_PREAMBLE {
                return Err(PreambleError::TooLong);
            }
            let b = src[i];
            if b != b'\\' {
                bytes.push(b);
                i += 1;
                continue;
            }
            i += 1;
            let Some(&esc) = src.get(i) else {
                return Err(PreambleError::Truncated(i));
            };
            match esc {
                b'a' => bytes.push(0x07),
                b'b' => bytes.push(0x08),
                b'f' => bytes.push(0x0c),
                b'n' => bytes.push(b'\n'),
                b'r' => bytes.push(b'\r'),
                b't' => bytes.push(b'\t'),
                b'v' => bytes.push(0x0b),
                b'\'' | b'"' | b'?' => bytes.push(esc),
                b'x' => {
                    let (Some(hi), Some(lo)) =
                        (src.get(i + 1).copied().and_then(hexval), src.get(i + 2).copied().and_then(hexval))
                    else {
                        return Err(PreambleError::BadEscape(i));
                    };
                    bytes.push((hi << 4) | lo);
                    i += 2;
                }
                0 => return Err(PreambleError::BadEscape(i)),
                _ => {
                    if !esc.is_ascii_digit() || esc > b'7' {
                        // Unknown escape: the character stands for itself.
                        bytes.push(esc);
                    } else {
                        let (Some(d2), Some(d3)) =
                            (src.get(i + 1).copied().and_then(octval), src.get(i + 2).copied().and_then(octval))
                        else {
                            return Err(PreambleError::BadEscape(i));
                        };
                        let val = u32::from(esc - b'0') * 64 + u32::from(d2) * 8 + u32::from(d3);
                        if val > 0xff {
                            return Err(PreambleError::BadEscape(i));
                        }
                        bytes.push(val as u8);
                        i += 2;
                    }
                }
            }
            i += 1;
        }
        if bytes.len() == MAX_PREAMBLE {
            return Err(PreambleError::TooLong);
        }
        Ok(Self { bytes })
    }

    /// The synthesized gpsd preamble.
    pub fn gpsd_watch() -> Self {
        Self { bytes: GPSD_WATCH.as_bytes().to_vec() }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writes the preamble in full to the connected socket.
    pub(crate) fn send(&self, mut stream: &TcpStream) -> io::Result<()> {
        stream.write_all(&self.bytes)
    }
}

#[inline]
fn hexval(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[inline]
fn octval(b: u8) -> Option<u8> {
    (b'0'..=b'7').contains(&b).then(|| b - b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes_pass_through() {
        assert_eq!(Preamble::parse("hello?").unwrap().as_bytes(), b"hello?");
    }

    #[test]
    fn escape_table() {
        assert_eq!(
            Preamble::parse("\\a\\b\\f\\n\\r\\t\\v\\'\\\"\\?").unwrap().as_bytes(),
            &[0x07, 0x08, 0x0c, b'\n', b'\r', b'\t', 0x0b, b'\'', b'"', b'?'],
        );
    }

    #[test]
    fn hex_and_octal_mix() {
        // "\x0d\x0a\101\n" -> CR LF 'A' LF
        let p = Preamble::parse("\\x0d\\x0a\\101\\n").unwrap();
        assert_eq!(p.as_bytes(), &[0x0d, 0x0a, 0x41, 0x0a]);
    }

    #[test]
    fn hex_decodes_both_cases() {
        assert_eq!(Preamble::parse("\\x7F\\x7f").unwrap().as_bytes(), &[0x7f, 0x7f]);
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(Preamble::parse("\\x0Z").is_err());
        assert!(Preamble::parse("\\x0").is_err());
        assert!(Preamble::parse("\\x").is_err());
    }

    #[test]
    fn octal_needs_three_digits_in_byte_range() {
        assert_eq!(Preamble::parse("\\377").unwrap().as_bytes(), &[0xff]);
        assert_eq!(Preamble::parse("\\000").unwrap().as_bytes(), &[0x00]);
        assert!(Preamble::parse("\\400").is_err());
        assert!(Preamble::parse("\\12").is_err());
        assert!(Preamble::parse("\\12x").is_err());
    }

    #[test]
    fn unknown_escape_is_literal() {
        assert_eq!(Preamble::parse("\\z\\8").unwrap().as_bytes(), b"z8");
    }

    #[test]
    fn trailing_backslash_rejected() {
        assert!(matches!(Preamble::parse("abc\\"), Err(PreambleError::Truncated(_))));
    }

    #[test]
    fn length_boundary() {
        let ok = "x".repeat(MAX_PREAMBLE - 1);
        assert_eq!(Preamble::parse(&ok).unwrap().len(), MAX_PREAMBLE - 1);
        let too_long = "x".repeat(MAX_PREAMBLE);
        assert_eq!(Preamble::parse(&too_long), Err(PreambleError::TooLong));
        // The cap fires before later errors are even seen.
        let capped = format!("{}\\x0Z", "x".repeat(MAX_PREAMBLE));
        assert_eq!(Preamble::parse(&capped), Err(PreambleError::TooLong));
    }

    #[test]
    fn unescaped_roundtrip() {
        // Printable bytes that need no escaping decode to themselves.
        let raw = "$GPGGA,0123*7F";
        assert_eq!(Preamble::parse(raw).unwrap().as_bytes(), raw.as_bytes());
    }

    #[test]
    fn gpsd_watch_bytes() {
        assert_eq!(Preamble::gpsd_watch().as_bytes(), GPSD_WATCH.as_bytes());
    }
}
