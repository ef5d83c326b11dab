//! TLS listener: routes by the ClientHello SNI, without terminating TLS.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use fluxgate_core::{record_body_len, AccessControl, ClientHello, RECORD_HEADER_LEN};

use crate::config::TlsListener;
use crate::listener;
use crate::splice::splice;

/// A ClientHello body larger than this is not worth buffering.
const MAX_CLIENT_HELLO: usize = 16 * 1024;

pub struct TlsProxy {
    cfg: TlsListener,
    acl: Arc<dyn AccessControl>,
}

impl TlsProxy {
    pub fn new(cfg: TlsListener, acl: Arc<dyn AccessControl>) -> Arc<Self> {
        Arc::new(Self { cfg, acl })
    }

    /// Bind the listener and serve connections until the task is dropped.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let id = self.cfg.id.clone();
        let listen = self.cfg.listen.clone();
        listener::serve_tcp(id, listen, move |stream, peer| {
            let proxy = Arc::clone(&self);
            async move { proxy.handle(stream, peer).await }
        })
        .await
    }

    async fn handle(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if self.acl.check_addr(peer).is_deny() {
            warn!("access denied");
            return;
        }

        let established = match self.cfg.deadline() {
            Some(limit) => match timeout(limit, self.establish(stream)).await {
                Ok(result) => result,
                Err(_) => {
                    info!("timeout reading client hello");
                    return;
                }
            },
            None => self.establish(stream).await,
        };

        if let Some((downstream, upstream)) = established {
            splice(downstream, upstream, self.cfg.idle()).await;
        }
    }

    /// Read record header and ClientHello body, extract the SNI, authorize
    /// and dial `sni:upstream_port`, replay the record verbatim.
    async fn establish(&self, mut stream: TcpStream) -> Option<(TcpStream, TcpStream)> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        if let Err(e) = stream.read_exact(&mut header).await {
            info!(error = %e, "error reading record header");
            return None;
        }
        let body_len = match record_body_len(&header) {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "rejected record");
                return None;
            }
        };
        if body_len == 0 || body_len > MAX_CLIENT_HELLO {
            warn!(len = body_len, "implausible client hello length");
            return None;
        }

        let mut body = vec![0u8; body_len];
        if let Err(e) = stream.read_exact(&mut body).await {
            info!(error = %e, "error reading client hello");
            return None;
        }

        let hello = match ClientHello::parse(&body) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(error = %e, "error parsing client hello");
                return None;
            }
        };
        let Some(server_name) = hello.server_name.filter(|name| !name.is_empty()) else {
            error!("no server name found");
            return None;
        };
        if !hello.alpn.is_empty() {
            debug!(sni = %server_name, alpn = ?hello.alpn, "client hello");
        }

        let target = format!("{}:{}", server_name, self.cfg.upstream_port);
        let upstream =
            super::dial_and_replay(&target, &self.cfg.upstreams, &[&header, &body]).await?;
        Some((stream, upstream))
    }
}
