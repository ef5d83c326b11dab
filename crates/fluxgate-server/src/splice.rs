//! Full-duplex byte pump between two established connections.
//!
//! Each direction runs as its own copy loop so a slow peer on one side
//! never stalls the other. When a direction finishes (EOF, idle timeout or
//! I/O error) it half-closes the connection it was writing to and cancels
//! the opposite direction; the opposite loop writes out whatever it has in
//! flight and exits on its next read. Both sockets are closed by the time
//! [`splice`] returns, whichever way the directions ended.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COPY_BUF: usize = 32 * 1024;

/// Shuttle bytes between `downstream` and `upstream` until both directions
/// complete. `idle` is the per-direction inactivity limit; `None` waits
/// forever.
pub async fn splice(downstream: TcpStream, upstream: TcpStream, idle: Option<Duration>) {
    let (down_read, down_write) = downstream.into_split();
    let (up_read, up_write) = upstream.into_split();

    let stop_forward = CancellationToken::new();
    let stop_reverse = CancellationToken::new();

    tokio::join!(
        pump(
            down_read,
            up_write,
            idle,
            stop_forward.clone(),
            stop_reverse.clone(),
            "forward",
        ),
        pump(
            up_read,
            down_write,
            idle,
            stop_reverse,
            stop_forward,
            "reverse",
        ),
    );
}

/// One direction of the pump. On exit: FIN towards the peer this direction
/// was feeding, then cancel the opposite direction.
async fn pump(
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    idle: Option<Duration>,
    stop: CancellationToken,
    other: CancellationToken,
    dir: &'static str,
) {
    match copy_loop(&mut src, &mut dst, idle, &stop).await {
        Ok(bytes) => debug!(dir, bytes, "direction done"),
        Err(e) => debug!(dir, error = %e, "direction aborted"),
    }
    let _ = dst.shutdown().await;
    other.cancel();
}

async fn copy_loop(
    src: &mut OwnedReadHalf,
    dst: &mut OwnedWriteHalf,
    idle: Option<Duration>,
    stop: &CancellationToken,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUF];
    let mut written = 0u64;
    loop {
        let n = tokio::select! {
            _ = stop.cancelled() => return Ok(written),
            read = with_idle(idle, src.read(&mut buf)) => read?,
        };
        if n == 0 {
            return Ok(written);
        }
        with_idle(idle, dst.write_all(&buf[..n])).await?;
        written += n as u64;
    }
}

/// Bound an I/O future by the idle limit, if one is configured.
async fn with_idle<T>(
    idle: Option<Duration>,
    io: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match idle {
        None => io.await,
        Some(limit) => timeout(limit, io)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
    }
}
