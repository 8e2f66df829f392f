use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use asocket_api::{MessageSender, Packet, Result, SocketCreationExt, StateSender, Transport};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_RECEIVE_BUFFER_LENGTH, Slot, bind, default_receive_buffer_length, receive_loop};
use crate::lifecycle::{self, Driver, Lifecycle};

/// Parameters of a [`UdpServer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdpServerConfig {
    /// Local address to bind, all IPv4 interfaces by default.
    #[serde(default = "unspecified")]
    pub bind: IpAddr,

    /// Local port to bind, `0` picks a free one.
    pub port: u16,

    /// Upper bound for the size of one delivered message.
    #[serde(default = "default_receive_buffer_length")]
    pub receive_buffer_length: usize,
}

fn unspecified() -> IpAddr {
    Ipv4Addr::UNSPECIFIED.into()
}

impl UdpServerConfig {
    /// Creates a configuration binding all IPv4 interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            bind: unspecified(),
            port,
            receive_buffer_length: DEFAULT_RECEIVE_BUFFER_LENGTH,
        }
    }

    /// Returns the address to bind.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// A UDP socket answering whoever talked to it last.
///
/// `write` sends to the sender of the most recently received datagram, and is dropped until one arrived. With several
/// clients, a reply can therefore reach a different client than the one it was meant for. Use `write_packet` to address
/// a client explicitly.
#[derive(Debug)]
pub struct UdpServer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: UdpServerConfig,
    lifecycle: Lifecycle,
    slot: Slot,
    last_sender: Mutex<Option<SocketAddr>>,
}

impl UdpServer {
    /// Creates a new, not yet started `UdpServer`.
    pub fn new(config: UdpServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new("udp-server"),
                slot: Slot::default(),
                last_sender: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UdpServerConfig {
        &self.inner.config
    }

    /// Returns the sender of the most recently received datagram of the running cycle.
    pub fn last_sender(&self) -> Option<SocketAddr> {
        *self.inner.last_sender.lock().unwrap()
    }
}

impl Drop for UdpServer {
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
        let address = self.config.address();
        let socket = bind(address, false).creating(address)?;
        socket.set_broadcast(true).creating(address)?;
        Ok(socket)
    }

    async fn run(self: Arc<Self>, socket: UdpSocket, cycle: CancellationToken) -> Result<()> {
        let socket = Arc::new(socket);
        tracing::info!(local = %socket.local_addr()?, "bound");
        self.last_sender.lock().unwrap().take();
        self.slot.set(socket.clone());

        let result = if self.lifecycle.enter().await {
            receive_loop(
                &socket,
                self.config.receive_buffer_length,
                &self.lifecycle,
                &cycle,
                |peer| *self.last_sender.lock().unwrap() = Some(peer),
            )
            .await
        } else {
            Ok(())
        };

        self.slot.clear();
        self.last_sender.lock().unwrap().take();
        Ok(result?)
    }
}

impl Transport for UdpServer {
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
        self.is_started() && self.last_sender().is_some()
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
        let Some(target) = self.last_sender() else {
            tracing::debug!("write ignored, no datagram received yet");
            return;
        };
        self.inner
            .slot
            .send_to(&self.inner.lifecycle, &data, target)
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
