//! Push framing
//!
//! An archive server pushes a file as a minimal HTTP-like message: a header
//! block terminated by a blank line, then exactly `length` raw bytes. The
//! header is scanned for two tokens only:
//!
//! ```text
//! POST /ARCHIVE HTTP/1.0
//! Content-Disposition: attachment; filename="frame_001.fits"
//! Content-length: 2880
//!
//! <2880 bytes>
//! ```
//!
//! The scanner is lenient about header syntax and strict only about size:
//! no terminator within the bound is an error.

use crate::error::FramingError;
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Acknowledgement written after a push has been handled
pub const ACK: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n";

const READ_CHUNK: usize = 1024;

/// Tokens extracted from a push header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushHeader {
    /// Value of the `filename="..."` token
    pub filename: String,
    /// Value of the `length:` token, if the sender provided one
    pub length: Option<u64>,
}

/// A header block read off the wire
#[derive(Debug)]
pub struct RawHeader {
    /// Header text without the terminating blank line
    pub text: String,
    /// Body bytes that arrived in the same reads as the header
    pub body_prefix: Vec<u8>,
}

#[allow(clippy::expect_used)]
fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"filename="([^"]*)""#).expect("filename pattern is valid"))
}

/// Matches the first header line ending in `length:`, in any case
///
/// Senders announce the body size as `Content-Length:`; that is the line this
/// is meant to pick up.
#[allow(clippy::expect_used)]
fn length_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?im)length:[ \t]*([^\r\n]*)").expect("length pattern is valid"))
}

/// Read bytes until the header terminator (`\r\n\r\n` or `\n\n`)
///
/// # Errors
/// - [`FramingError::HeaderTooLarge`] when no terminator shows up within `max_bytes`
/// - [`FramingError::ConnectionClosed`] when the peer hangs up first
pub async fn read_header<R>(reader: &mut R, max_bytes: usize) -> crate::Result<RawHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        // Only rescan the tail that could contain a new terminator
        let scan_from = buf.len().saturating_sub(3);
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(FramingError::ConnectionClosed.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((end, terminator_len)) = find_terminator(&buf, scan_from) {
            if end > max_bytes {
                return Err(FramingError::HeaderTooLarge { limit: max_bytes }.into());
            }
            let body_prefix = buf.split_off(end + terminator_len);
            buf.truncate(end);
            return Ok(RawHeader {
                text: String::from_utf8_lossy(&buf).into_owned(),
                body_prefix,
            });
        }

        if buf.len() > max_bytes {
            return Err(FramingError::HeaderTooLarge { limit: max_bytes }.into());
        }
    }
}

/// Position and length of the earliest header terminator at or after `from`
fn find_terminator(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let window = buf.get(from..)?;
    let crlf = window
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (from + p, 4));
    let lf = window
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|p| (from + p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Extract the filename and length tokens from header text
///
/// # Errors
/// - [`FramingError::MissingFilename`] when there is no `filename="..."` token
/// - [`FramingError::InvalidLength`] when a `length:` token is not a byte count
pub fn parse_header(text: &str) -> Result<PushHeader, FramingError> {
    let filename = filename_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(FramingError::MissingFilename)?;

    let length = match length_pattern().captures(text).and_then(|c| c.get(1)) {
        Some(m) => {
            let raw = m.as_str().trim();
            Some(
                raw.parse::<u64>()
                    .map_err(|_| FramingError::InvalidLength(raw.to_string()))?,
            )
        }
        None => None,
    };

    Ok(PushHeader { filename, length })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn parses_filename_and_length() {
        let header = "POST /ARCHIVE HTTP/1.0\r\n\
                      Content-Disposition: attachment; filename=\"X.fits\"\r\n\
                      Content-length: 5";
        assert_eq!(
            parse_header(header).unwrap(),
            PushHeader {
                filename: "X.fits".into(),
                length: Some(5),
            }
        );
    }

    #[test]
    fn bare_length_token() {
        let header = "filename=\"a\"\nlength: 42";
        assert_eq!(parse_header(header).unwrap().length, Some(42));
    }

    #[test]
    fn canonical_content_length_is_matched() {
        let header = "Content-Type: application/x-gfits\r\n\
                      Content-Disposition: attachment; filename=\"a\"; wait=\"1\"\r\n\
                      Content-Length: 42";
        assert_eq!(parse_header(header).unwrap().length, Some(42));
    }

    #[test]
    fn missing_tokens() {
        assert!(matches!(
            parse_header("Content-length: 5"),
            Err(FramingError::MissingFilename)
        ));
        assert_eq!(parse_header("filename=\"a\"").unwrap().length, None);
        assert!(matches!(
            parse_header("filename=\"a\"\r\nlength: lots"),
            Err(FramingError::InvalidLength(v)) if v == "lots"
        ));
    }

    #[tokio::test]
    async fn header_split_keeps_body_prefix() {
        let wire = b"filename=\"x\"\r\nlength: 5\r\n\r\nhello".to_vec();
        let raw = read_header(&mut wire.as_slice(), 1024).await.unwrap();
        assert_eq!(raw.text, "filename=\"x\"\r\nlength: 5");
        assert_eq!(raw.body_prefix, b"hello");
    }

    #[tokio::test]
    async fn bare_newline_terminator() {
        let wire = b"filename=\"x\"\nlength: 2\n\nab".to_vec();
        let raw = read_header(&mut wire.as_slice(), 1024).await.unwrap();
        assert_eq!(raw.text, "filename=\"x\"\nlength: 2");
        assert_eq!(raw.body_prefix, b"ab");
    }

    #[tokio::test]
    async fn terminator_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"filename=\"x\"\r\n").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"\r\nrest").await.unwrap();
        });
        let raw = read_header(&mut server, 1024).await.unwrap();
        writer.await.unwrap();
        assert_eq!(raw.text, "filename=\"x\"");
        assert_eq!(raw.body_prefix, b"rest");
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let wire = vec![b'a'; 4096];
        let err = read_header(&mut wire.as_slice(), 100).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Framing(FramingError::HeaderTooLarge { limit: 100 })
        ));
    }

    #[tokio::test]
    async fn early_hangup_is_reported() {
        let wire = b"filename=\"x\"\r\n".to_vec();
        let err = read_header(&mut wire.as_slice(), 1024).await.unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::ConnectionClosed)));
    }
}
