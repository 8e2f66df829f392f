//! UDP transports.
//!
//! Every received datagram is delivered as one [`Message`], truncated to the receive buffer length.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use asocket_api::Message;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Lifecycle;

mod client;
mod multicast;
mod server;

pub use client::{UdpClient, UdpClientConfig};
pub use multicast::{UdpMulticast, UdpMulticastConfig};
pub use server::{UdpServer, UdpServerConfig};

/// Default receive buffer size, one Ethernet payload without IP and UDP headers.
pub const DEFAULT_RECEIVE_BUFFER_LENGTH: usize = 1460;

fn default_receive_buffer_length() -> usize {
    DEFAULT_RECEIVE_BUFFER_LENGTH
}

/// Binds a non-blocking datagram socket.
///
/// `shared` sockets allow other sockets on this host to bind the same address, as needed by group members.
fn bind(address: SocketAddr, shared: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;
    if shared {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    UdpSocket::from_std(socket.into())
}

/// The socket of the running cycle, shared with writers.
#[derive(Debug, Default)]
struct Slot(Mutex<Option<Arc<UdpSocket>>>);

impl Slot {
    fn set(&self, socket: Arc<UdpSocket>) {
        *self.0.lock().unwrap() = Some(socket);
    }

    fn clear(&self) {
        self.0.lock().unwrap().take();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        let socket = self.0.lock().unwrap().clone();
        socket.and_then(|socket| socket.local_addr().ok())
    }

    /// Sends one datagram, logging writes outside of a running cycle.
    async fn send_to(&self, lifecycle: &Lifecycle, data: &[u8], target: SocketAddr) {
        let socket = self.0.lock().unwrap().clone();
        let Some(socket) = socket.filter(|_| lifecycle.is_running()) else {
            lifecycle.not_started();
            return;
        };

        match socket.send_to(data, target).await {
            Ok(sent) if sent == data.len() => tracing::trace!(%target, length = sent, "wrote"),
            Ok(sent) => tracing::warn!(%target, sent, length = data.len(), "datagram was truncated"),
            Err(error) => lifecycle.write_failed(error).await,
        }
    }
}

/// Delivers every datagram until `cycle` is cancelled or receiving fails.
///
/// `on_datagram` sees the sender of each datagram before it is delivered.
async fn receive_loop(
    socket: &UdpSocket,
    buffer_length: usize,
    lifecycle: &Lifecycle,
    cycle: &CancellationToken,
    mut on_datagram: impl FnMut(SocketAddr) + Send,
) -> io::Result<()> {
    let mut buffer = vec![0; buffer_length];
    loop {
        let (length, peer) = tokio::select! {
            received = socket.recv_from(&mut buffer) => received?,
            _ = cycle.cancelled() => return Ok(()),
        };

        tracing::trace!(%peer, length, "received");
        on_datagram(peer);
        lifecycle
            .deliver(Message::new(&buffer[..length], peer), cycle)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::bind;

    #[tokio::test]
    async fn exclusive_bind_conflicts() {
        let first = bind("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let address = first.local_addr().unwrap();

        let error = bind(address, false).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn shared_bind_coexists() {
        let first = bind("127.0.0.1:0".parse().unwrap(), true).unwrap();
        let address = first.local_addr().unwrap();

        let second = bind(address, true).unwrap();
        assert_eq!(second.local_addr().unwrap(), address);
    }
}
