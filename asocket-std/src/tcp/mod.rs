//! TCP transports.
//!
//! A [`TcpClient`] drives one outgoing connection, a [`TcpServer`] one read loop per accepted peer. Neither applies
//! framing, each read is delivered as one [`Message`].

use std::net::SocketAddr;
use std::sync::Arc;

use asocket_api::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Lifecycle;

mod client;
mod server;

pub use client::{TcpClient, TcpClientConfig};
pub use server::{TcpServer, TcpServerConfig};

/// Default read buffer size for TCP connections.
pub const DEFAULT_READ_BUFFER_LENGTH: usize = 4096;

/// The write half of a connection, shared between concurrent writers.
///
/// The lock is only held for one `write_all`, so concurrent writes do not interleave. Writes still pending when the
/// connection's cycle is cancelled are abandoned, so the half is released together with the read side.
#[derive(Debug, Clone)]
struct Writer {
    half: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    cycle: CancellationToken,
}

impl Writer {
    fn new(half: OwnedWriteHalf, cycle: CancellationToken) -> Self {
        Self {
            half: Arc::new(tokio::sync::Mutex::new(half)),
            cycle,
        }
    }

    /// Returns `None` if the cycle ended before all of `data` was written.
    async fn send(&self, data: &[u8]) -> Option<std::io::Result<()>> {
        tokio::select! {
            written = self.write_all(data) => Some(written),
            _ = self.cycle.cancelled() => None,
        }
    }

    async fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut half = self.half.lock().await;
        half.write_all(data).await?;
        half.flush().await
    }

    fn same_connection(&self, other: &Writer) -> bool {
        Arc::ptr_eq(&self.half, &other.half)
    }
}

/// Delivers every read from `reader` until the peer shuts down its side or `cycle` is cancelled.
async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    buffer_length: usize,
    lifecycle: &Lifecycle,
    cycle: &CancellationToken,
) -> std::io::Result<()> {
    let mut buffer = vec![0; buffer_length];
    loop {
        let read = tokio::select! {
            read = reader.read(&mut buffer) => read?,
            _ = cycle.cancelled() => return Ok(()),
        };

        if read == 0 {
            tracing::debug!(%peer, "peer shut down its side of the connection");
            return Ok(());
        }

        tracing::trace!(%peer, length = read, "received");
        lifecycle
            .deliver(Message::new(&buffer[..read], peer), cycle)
            .await;
    }
}
