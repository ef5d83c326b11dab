//! Generic TCP accept loop.
//!
//! Binds a listener and spawns one task per accepted connection. Every
//! connection task runs inside a tracing span carrying the listener id and
//! the peer address, so all downstream events are attributable without
//! threading the fields by hand. Bind failure is fatal to the listener;
//! accept failures are logged and the loop keeps going.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, info_span, warn, Instrument};

pub async fn serve_tcp<F, Fut>(id: String, listen: String, handle: F) -> anyhow::Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("cannot bind {listen}"))?;
    info!(id = %id, listen = %listen, "tcp listener started");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let span = info_span!("conn", id = %id, src = %peer);
                tokio::spawn(handle(stream, peer).instrument(span));
            }
            Err(e) => {
                warn!(id = %id, error = %e, "accept failed");
            }
        }
    }
}
