//! Connection routing for the TCP listeners.
//!
//! Both listener flavours run the same state machine: admit the source,
//! peek at the first bytes to learn the intended host, authorize the
//! derived target against the upstream allow-list, dial it, replay the
//! peeked bytes verbatim, then hand both sockets to the splice engine.
//! The peek-to-replay stretch runs under the listener's `deadline`; once a
//! connection is spliced only the per-direction idle timeout applies.
//!
//! Every failure along the way closes the downstream and stops; an
//! upstream is never contacted before the target passed the allow-list.

pub mod http;
pub mod tls;

pub use http::HttpProxy;
pub use tls::TlsProxy;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error};

use fluxgate_core::many_glob;

/// Authorize `target`, dial it and replay the peeked bytes in order.
///
/// Returns the connected upstream, or `None` after logging why the
/// connection cannot proceed. `replay` chunks are written back-to-back; the
/// concatenation is exactly what was read from the downstream.
pub(crate) async fn dial_and_replay(
    target: &str,
    upstreams: &[String],
    replay: &[&[u8]],
) -> Option<TcpStream> {
    if !many_glob(upstreams, target) {
        error!(upstream = %target, "upstream not allowed");
        return None;
    }

    let mut upstream = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(upstream = %target, error = %e, "error connecting to upstream");
            return None;
        }
    };
    debug!(upstream = %target, "connected to upstream");

    for chunk in replay {
        if let Err(e) = upstream.write_all(chunk).await {
            error!(upstream = %target, error = %e, "error writing to upstream");
            return None;
        }
    }
    Some(upstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn denied_target_never_dials() {
        // No listener exists on this port; a dial attempt would error, a
        // denied target must not even try.
        let upstreams = vec!["*.example.com:80".to_string()];
        assert!(dial_and_replay("evil.test:80", &upstreams, &[b"x"]).await.is_none());

        let empty: Vec<String> = Vec::new();
        assert!(dial_and_replay("a.example.com:80", &empty, &[]).await.is_none());
    }

    #[tokio::test]
    async fn replays_chunks_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let target = addr.to_string();

        let accept = tokio::spawn(async move {
            let (mut server, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8];
            server.read_exact(&mut buf).await.unwrap();
            buf
        });

        let upstreams = vec!["127.0.0.1:*".to_string()];
        let upstream = dial_and_replay(&target, &upstreams, &[b"abc", b"", b"defgh"])
            .await
            .unwrap();
        assert_eq!(&accept.await.unwrap(), b"abcdefgh");
        drop(upstream);
    }

    #[tokio::test]
    async fn unreachable_target_is_reported() {
        // A port nothing listens on; the dial itself must fail cleanly.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        drop(listener);

        let upstreams = vec!["*".to_string()];
        assert!(dial_and_replay(&target, &upstreams, &[]).await.is_none());
    }
}
