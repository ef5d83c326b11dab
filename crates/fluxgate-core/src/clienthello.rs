//! TLS record and ClientHello decoding, without terminating TLS.
//!
//! The router reads the 5-byte record header itself ([`record_body_len`]
//! validates it and yields the body length), then hands the record body to
//! [`ClientHello::parse`]. The parser walks the handshake structure far
//! enough to pull out the SNI `server_name` (and the ALPN list, which is
//! handy in logs); it never allocates beyond the extracted strings and
//! never touches the network.

use crate::error::{CoreError, CoreResult};

/// Length of the TLS record header: type, legacy version, body length.
pub const RECORD_HEADER_LEN: usize = 5;

const HANDSHAKE_RECORD: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;

const EXT_SERVER_NAME: u16 = 0;
const EXT_ALPN: u16 = 16;

const SNI_HOST_NAME: u8 = 0;

/// Validate a TLS record header and return the body length to read.
///
/// Rejects record types other than handshake and legacy versions below
/// 3.1 (SSL 3.0 and older).
pub fn record_body_len(header: &[u8; RECORD_HEADER_LEN]) -> CoreResult<usize> {
    if header[0] != HANDSHAKE_RECORD {
        return Err(CoreError::NotHandshake(header[0]));
    }
    let (major, minor) = (header[1], header[2]);
    if major < 3 || (major == 3 && minor < 1) {
        return Err(CoreError::TlsVersion(major, minor));
    }
    Ok(usize::from(u16::from_be_bytes([header[3], header[4]])))
}

/// The fields of a ClientHello this proxy cares about.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    /// Client legacy protocol version from the handshake body.
    pub version: u16,
    /// SNI host name, when the client sent one.
    pub server_name: Option<String>,
    /// ALPN protocol names, in client preference order.
    pub alpn: Vec<String>,
}

impl ClientHello {
    /// Parse a ClientHello from a record body.
    ///
    /// A body that ends before the extensions block is valid (old clients
    /// may omit extensions entirely) and yields an empty `server_name`;
    /// callers that require SNI must treat that as a failure. Any length
    /// field pointing past the end of the body is an error.
    pub fn parse(body: &[u8]) -> CoreResult<Self> {
        let mut r = Reader::new(body);

        if r.u8()? != CLIENT_HELLO {
            return Err(CoreError::ClientHello("not a ClientHello handshake"));
        }
        r.skip(3)?; // handshake length

        let version = r.u16()?;
        r.skip(32)?; // random

        let session_id_len = usize::from(r.u8()?);
        if session_id_len > 32 {
            return Err(CoreError::ClientHello("session id longer than 32 bytes"));
        }
        r.skip(session_id_len)?;

        let cipher_suites_len = usize::from(r.u16()?);
        if cipher_suites_len % 2 != 0 {
            return Err(CoreError::ClientHello("odd cipher suite length"));
        }
        r.skip(cipher_suites_len)?;

        let compression_len = usize::from(r.u8()?);
        r.skip(compression_len)?;

        let mut hello = ClientHello {
            version,
            ..ClientHello::default()
        };

        if r.is_empty() {
            // ClientHello is optionally followed by extension data.
            return Ok(hello);
        }

        let extensions_len = usize::from(r.u16()?);
        if extensions_len != r.remaining() {
            return Err(CoreError::ClientHello("extensions length mismatch"));
        }

        while !r.is_empty() {
            let ext_type = r.u16()?;
            let ext_len = usize::from(r.u16()?);
            let mut ext = Reader::new(r.take(ext_len)?);

            match ext_type {
                EXT_SERVER_NAME => {
                    let list_len = usize::from(ext.u16()?);
                    let mut names = Reader::new(ext.take(list_len)?);
                    while !names.is_empty() {
                        let name_type = names.u8()?;
                        let name_len = usize::from(names.u16()?);
                        let name = names.take(name_len)?;
                        if name_type == SNI_HOST_NAME {
                            let host = std::str::from_utf8(name)
                                .map_err(|_| CoreError::ClientHello("server name is not utf-8"))?;
                            hello.server_name = Some(host.to_string());
                            break;
                        }
                    }
                }
                EXT_ALPN => {
                    let list_len = usize::from(ext.u16()?);
                    let mut protos = Reader::new(ext.take(list_len)?);
                    while !protos.is_empty() {
                        let proto_len = usize::from(protos.u8()?);
                        if proto_len == 0 {
                            return Err(CoreError::ClientHello("empty ALPN protocol"));
                        }
                        let proto = protos.take(proto_len)?;
                        let proto = std::str::from_utf8(proto)
                            .map_err(|_| CoreError::ClientHello("ALPN protocol is not utf-8"))?;
                        hello.alpn.push(proto.to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(hello)
    }
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if n > self.data.len() {
            return Err(CoreError::ClientHello("length field overflows body"));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> CoreResult<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a ClientHello record body for tests.
    fn hello_body(session_id: &[u8], extensions: &[u8]) -> Vec<u8> {
        let mut body = vec![CLIENT_HELLO];
        // Handshake length is skipped by the parser; fill it truthfully anyway.
        let mut inner = Vec::new();
        inner.extend_from_slice(&[0x03, 0x03]); // client version TLS 1.2
        inner.extend_from_slice(&[0u8; 32]); // random
        inner.push(session_id.len() as u8);
        inner.extend_from_slice(session_id);
        inner.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
        inner.extend_from_slice(&[0x01, 0x00]); // null compression
        if !extensions.is_empty() {
            inner.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
            inner.extend_from_slice(extensions);
        }
        let len = inner.len() as u32;
        body.extend_from_slice(&len.to_be_bytes()[1..]);
        body.extend_from_slice(&inner);
        body
    }

    fn sni_extension(host: &str) -> Vec<u8> {
        let name = host.as_bytes();
        let mut entry = vec![SNI_HOST_NAME];
        entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
        entry.extend_from_slice(name);

        let mut ext = Vec::new();
        ext.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
        ext.extend_from_slice(&((entry.len() + 2) as u16).to_be_bytes());
        ext.extend_from_slice(&(entry.len() as u16).to_be_bytes());
        ext.extend_from_slice(&entry);
        ext
    }

    fn alpn_extension(protos: &[&str]) -> Vec<u8> {
        let mut list = Vec::new();
        for p in protos {
            list.push(p.len() as u8);
            list.extend_from_slice(p.as_bytes());
        }
        let mut ext = Vec::new();
        ext.extend_from_slice(&EXT_ALPN.to_be_bytes());
        ext.extend_from_slice(&((list.len() + 2) as u16).to_be_bytes());
        ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
        ext.extend_from_slice(&list);
        ext
    }

    #[test]
    fn record_header_validation() {
        assert_eq!(record_body_len(&[0x16, 0x03, 0x01, 0x01, 0x02]).unwrap(), 0x0102);
        assert!(matches!(
            record_body_len(&[0x17, 0x03, 0x01, 0x00, 0x00]),
            Err(CoreError::NotHandshake(0x17))
        ));
        assert!(matches!(
            record_body_len(&[0x16, 0x03, 0x00, 0x00, 0x00]),
            Err(CoreError::TlsVersion(3, 0))
        ));
        assert!(matches!(
            record_body_len(&[0x16, 0x02, 0x00, 0x00, 0x00]),
            Err(CoreError::TlsVersion(2, 0))
        ));
    }

    #[test]
    fn extracts_sni() {
        let body = hello_body(&[0xaa; 16], &sni_extension("svc.example"));
        let hello = ClientHello::parse(&body).unwrap();
        assert_eq!(hello.server_name.as_deref(), Some("svc.example"));
        assert_eq!(hello.version, 0x0303);
    }

    #[test]
    fn extracts_alpn_alongside_sni() {
        let mut ext = sni_extension("svc.example");
        ext.extend_from_slice(&alpn_extension(&["h2", "http/1.1"]));
        let hello = ClientHello::parse(&hello_body(&[], &ext)).unwrap();
        assert_eq!(hello.server_name.as_deref(), Some("svc.example"));
        assert_eq!(hello.alpn, vec!["h2".to_string(), "http/1.1".to_string()]);
    }

    #[test]
    fn no_extensions_yields_empty_sni() {
        let hello = ClientHello::parse(&hello_body(&[], &[])).unwrap();
        assert!(hello.server_name.is_none());
    }

    #[test]
    fn extension_block_without_sni_yields_empty_sni() {
        let hello = ClientHello::parse(&hello_body(&[], &alpn_extension(&["h2"]))).unwrap();
        assert!(hello.server_name.is_none());
        assert_eq!(hello.alpn, vec!["h2".to_string()]);
    }

    #[test]
    fn non_host_name_entries_are_skipped() {
        // First entry has an unknown name type; the host_name entry follows.
        let mut entries = vec![0x07, 0x00, 0x02, 0xde, 0xad];
        entries.push(SNI_HOST_NAME);
        entries.extend_from_slice(&(b"fallback.test".len() as u16).to_be_bytes());
        entries.extend_from_slice(b"fallback.test");

        let mut ext = Vec::new();
        ext.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
        ext.extend_from_slice(&((entries.len() + 2) as u16).to_be_bytes());
        ext.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        ext.extend_from_slice(&entries);

        let hello = ClientHello::parse(&hello_body(&[], &ext)).unwrap();
        assert_eq!(hello.server_name.as_deref(), Some("fallback.test"));
    }

    #[test]
    fn rejects_wrong_handshake_type() {
        let mut body = hello_body(&[], &[]);
        body[0] = 0x02; // ServerHello
        assert!(ClientHello::parse(&body).is_err());
    }

    #[test]
    fn rejects_oversized_session_id() {
        let mut body = vec![CLIENT_HELLO, 0, 0, 40];
        body.extend_from_slice(&[0x03, 0x03]);
        body.extend_from_slice(&[0u8; 32]);
        body.push(33); // session id length > 32
        body.extend_from_slice(&[0u8; 33]);
        assert!(ClientHello::parse(&body).is_err());
    }

    #[test]
    fn rejects_odd_cipher_suite_length() {
        let mut body = vec![CLIENT_HELLO, 0, 0, 0];
        body.extend_from_slice(&[0x03, 0x03]);
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // empty session id
        body.extend_from_slice(&[0x00, 0x03]); // odd
        body.extend_from_slice(&[0, 0, 0]);
        assert!(ClientHello::parse(&body).is_err());
    }

    #[test]
    fn rejects_extension_length_mismatch() {
        let ext = sni_extension("svc.example");
        let mut body = hello_body(&[], &ext);
        // Corrupt the declared extensions length (2 bytes before the block).
        let pos = body.len() - ext.len() - 2;
        body[pos] = 0xff;
        assert!(ClientHello::parse(&body).is_err());
    }

    #[test]
    fn rejects_truncated_body() {
        let body = hello_body(&[], &sni_extension("svc.example"));
        for cut in [1, 10, 40, body.len() - 1] {
            assert!(ClientHello::parse(&body[..cut]).is_err(), "cut at {cut}");
        }
    }
}
