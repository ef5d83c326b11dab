//! Minimal HTTP request-header reader.
//!
//! Reads header lines off a buffered downstream until it sees a `Host:`
//! line or the end of the header block, keeping every raw byte so the
//! router can replay the request to the upstream verbatim. This is not an
//! HTTP parser; nothing past the header block is ever inspected.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Upper bound on the header block; a peer still sending headers past this
/// is cut off.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Result of scanning the header block.
#[derive(Debug, Default)]
pub struct HeaderPeek {
    /// `Host:` value, trimmed. `None` when the block ended without one.
    pub host: Option<String>,
    /// The request line, for optional request logging.
    pub request_line: Option<String>,
    /// Raw line bytes exactly as read, in order, terminators included.
    pub lines: Vec<Vec<u8>>,
}

/// Read lines until a `Host:` header or the end of the header block.
///
/// Lines end with `\r\n`; a bare `\n` is tolerated. The match on `Host:`
/// is case-sensitive. A `Host:` header with an empty value does not stop
/// the scan. EOF inside the header block is an error, as is exceeding
/// [`MAX_HEADER_BYTES`].
pub async fn read_until_host<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> io::Result<HeaderPeek> {
    let mut peek = HeaderPeek::default();
    let mut total = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside header block",
            ));
        }
        total += n;
        if total > MAX_HEADER_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "header block too large",
            ));
        }

        let text = trim_line(&line);
        if peek.request_line.is_none() {
            peek.request_line = Some(String::from_utf8_lossy(text).into_owned());
        }
        let end_of_headers = text.is_empty();
        let host = host_value(text);
        peek.lines.push(line);

        if let Some(host) = host {
            peek.host = Some(host);
            return Ok(peek);
        }
        if end_of_headers {
            return Ok(peek);
        }
    }
}

/// Strip one trailing `\n` and one trailing `\r`.
fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Extract a non-empty `Host:` value from a header line.
fn host_value(line: &[u8]) -> Option<String> {
    let rest = line.strip_prefix(b"Host:")?;
    let value = String::from_utf8_lossy(rest).trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan(input: &[u8]) -> io::Result<HeaderPeek> {
        let mut reader = BufReader::new(input);
        read_until_host(&mut reader).await
    }

    #[tokio::test]
    async fn finds_host_and_keeps_raw_lines() {
        let input = b"GET / HTTP/1.1\r\nHost: a.example.com\r\nX-Next: skipped\r\n\r\n";
        let mut reader = BufReader::new(&input[..]);
        let peek = read_until_host(&mut reader).await.unwrap();

        assert_eq!(peek.host.as_deref(), Some("a.example.com"));
        assert_eq!(peek.request_line.as_deref(), Some("GET / HTTP/1.1"));
        // The scan stops at the Host line; later headers stay unread.
        assert_eq!(
            peek.lines.concat(),
            b"GET / HTTP/1.1\r\nHost: a.example.com\r\n"
        );
        assert_eq!(reader.buffer(), b"X-Next: skipped\r\n\r\n");
    }

    #[tokio::test]
    async fn tolerates_bare_newlines() {
        let input = b"GET / HTTP/1.1\nHost: b.example.com\n\n";
        let peek = scan(input).await.unwrap();
        assert_eq!(peek.host.as_deref(), Some("b.example.com"));
        assert_eq!(peek.lines.concat(), b"GET / HTTP/1.1\nHost: b.example.com\n");
    }

    #[tokio::test]
    async fn missing_host_ends_at_empty_line() {
        let input = b"GET / HTTP/1.1\r\nX-A: 1\r\n\r\nbody";
        let peek = scan(input).await.unwrap();
        assert!(peek.host.is_none());
        assert_eq!(peek.lines.concat(), b"GET / HTTP/1.1\r\nX-A: 1\r\n\r\n");
    }

    #[tokio::test]
    async fn host_match_is_case_sensitive() {
        let input = b"GET / HTTP/1.1\r\nhost: lower.example.com\r\n\r\n";
        let peek = scan(input).await.unwrap();
        assert!(peek.host.is_none());
    }

    #[tokio::test]
    async fn empty_host_value_does_not_stop_the_scan() {
        let input = b"GET / HTTP/1.1\r\nHost:\r\nHost: real.example.com\r\n\r\n";
        let peek = scan(input).await.unwrap();
        assert_eq!(peek.host.as_deref(), Some("real.example.com"));
    }

    #[tokio::test]
    async fn value_is_trimmed() {
        let input = b"GET / HTTP/1.1\r\nHost:   spaced.example.com  \r\n\r\n";
        let peek = scan(input).await.unwrap();
        assert_eq!(peek.host.as_deref(), Some("spaced.example.com"));
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        let input = b"GET / HTTP/1.1\r\nHost";
        let mut reader = BufReader::new(&input[..]);
        // The dangling token is consumed as an unterminated line, then EOF.
        let err = read_until_host(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_header_block_is_rejected() {
        let mut input = Vec::from(&b"GET / HTTP/1.1\r\n"[..]);
        while input.len() <= MAX_HEADER_BYTES {
            input.extend_from_slice(b"X-Pad: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        let mut reader = BufReader::new(&input[..]);
        let err = read_until_host(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
