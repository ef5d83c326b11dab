//! Plaintext HTTP listener: routes by the `Host:` header.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn};

use fluxgate_core::AccessControl;

use crate::config::HttpListener;
use crate::httphdr;
use crate::listener;
use crate::splice::splice;

pub struct HttpProxy {
    cfg: HttpListener,
    acl: Arc<dyn AccessControl>,
}

impl HttpProxy {
    pub fn new(cfg: HttpListener, acl: Arc<dyn AccessControl>) -> Arc<Self> {
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
                    info!("timeout reading request header");
                    return;
                }
            },
            None => self.establish(stream).await,
        };

        if let Some((downstream, upstream)) = established {
            splice(downstream, upstream, self.cfg.idle()).await;
        }
    }

    /// Peek the `Host:` header, authorize and dial the target, replay the
    /// request bytes. Runs under the listener deadline.
    async fn establish(&self, stream: TcpStream) -> Option<(TcpStream, TcpStream)> {
        let mut reader = BufReader::new(stream);
        let peek = match httphdr::read_until_host(&mut reader).await {
            Ok(peek) => peek,
            Err(e) => {
                error!(error = %e, "error reading request header");
                return None;
            }
        };
        let Some(host) = peek.host else {
            error!("no host header found");
            return None;
        };

        let target = if host.contains(':') {
            host
        } else {
            format!("{host}:80")
        };

        if self.cfg.log_request {
            if let Some(line) = &peek.request_line {
                info!(request = %line, upstream = %target, "proxying request");
            }
        }

        // Bytes the reader pulled in past the Host line must reach the
        // upstream before the bare socket takes over.
        let buffered = reader.buffer().to_vec();
        let downstream = reader.into_inner();

        let mut chunks: Vec<&[u8]> = peek.lines.iter().map(|line| line.as_slice()).collect();
        chunks.push(&buffered);

        let upstream = super::dial_and_replay(&target, &self.cfg.upstreams, &chunks).await?;
        Some((downstream, upstream))
    }
}
