use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use asocket_api::{
    Endpoint, Error, MessageSender, Packet, Result, SocketCreationExt, StateEvent, StateSender,
    Transport,
};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_RECEIVE_BUFFER_LENGTH, Slot, bind, default_receive_buffer_length, receive_loop};
use crate::lifecycle::{self, Driver, Lifecycle};

/// Parameters of a [`UdpClient`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdpClientConfig {
    /// Default destination of `write`.
    pub remote: Endpoint,

    /// Local port to bind, `0` picks a free one.
    #[serde(default)]
    pub local_port: u16,

    /// Upper bound for the size of one delivered message.
    #[serde(default = "default_receive_buffer_length")]
    pub receive_buffer_length: usize,
}

impl UdpClientConfig {
    /// Creates a configuration sending to `remote` from a free local port.
    pub fn new(remote: impl Into<Endpoint>) -> Self {
        Self {
            remote: remote.into(),
            local_port: 0,
            receive_buffer_length: DEFAULT_RECEIVE_BUFFER_LENGTH,
        }
    }
}

/// A UDP socket with a default remote endpoint.
///
/// The remote host is resolved on the first `write`, `write_packet` sends to any address. Broadcast destinations are
/// allowed.
#[derive(Debug)]
pub struct UdpClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: UdpClientConfig,
    lifecycle: Lifecycle,
    slot: Slot,
    remote: OnceCell<SocketAddr>,
}

impl UdpClient {
    /// Creates a new, not yet started `UdpClient`.
    pub fn new(config: UdpClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new("udp-client"),
                slot: Slot::default(),
                remote: OnceCell::new(),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UdpClientConfig {
        &self.inner.config
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.inner.lifecycle.close();
    }
}

impl Driver for Inner {
    type Socket = UdpSocket;

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn create_socket(&self) -> Result<UdpSocket> {
        let ip: IpAddr = if self.config.remote.is_ipv6() {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        let address = SocketAddr::new(ip, self.config.local_port);

        let socket = bind(address, false).creating(address)?;
        socket.set_broadcast(true).creating(address)?;
        Ok(socket)
    }

    async fn run(self: Arc<Self>, socket: UdpSocket, cycle: CancellationToken) -> Result<()> {
        let socket = Arc::new(socket);
        tracing::info!(local = %socket.local_addr()?, remote = %self.config.remote, "bound");
        self.slot.set(socket.clone());

        let result = if self.lifecycle.enter().await {
            receive_loop(
                &socket,
                self.config.receive_buffer_length,
                &self.lifecycle,
                &cycle,
                |_| {},
            )
            .await
        } else {
            Ok(())
        };

        self.slot.clear();
        Ok(result?)
    }
}

impl Transport for UdpClient {
    type Socket = UdpSocket;

    fn create_socket(&self) -> impl Future<Output = Result<UdpSocket>> + Send {
        Driver::create_socket(&*self.inner)
    }

    fn start(&self) {
        lifecycle::start(&self.inner);
    }

    fn close(&self) {
        self.inner.lifecycle.close();
    }

    fn is_started(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    fn is_connected(&self) -> bool {
        self.is_started()
    }

    fn is_closed(&self) -> bool {
        !self.is_started()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.slot.local_addr()
    }

    async fn write(&self, data: Vec<u8>) {
        if !self.is_started() {
            self.inner.lifecycle.not_started();
            return;
        }

        let endpoint = &self.inner.config.remote;
        let remote = match self.inner.remote.get_or_try_init(|| endpoint.resolve()).await {
            Ok(remote) => *remote,
            Err(source) => {
                tracing::warn!(error = ?source, %endpoint, "failed to resolve remote");
                let error = Error::Resolve {
                    endpoint: endpoint.clone(),
                    source,
                };
                self.inner.lifecycle.emit(StateEvent::ExceptionRaised(error)).await;
                return;
            }
        };

        self.inner
            .slot
            .send_to(&self.inner.lifecycle, &data, remote)
            .await;
    }

    async fn write_packet(&self, packet: Packet) {
        self.inner
            .slot
            .send_to(&self.inner.lifecycle, &packet.data, packet.address)
            .await;
    }

    fn set_state_listener(&self, listener: StateSender) {
        self.inner.lifecycle.set_state_listener(listener);
    }

    fn set_message_listener(&self, listener: MessageSender) {
        self.inner.lifecycle.set_message_listener(listener);
    }

    fn set_executor(&self, executor: tokio::runtime::Handle) {
        self.inner.lifecycle.set_executor(executor);
    }
}
