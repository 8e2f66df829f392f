use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use asocket_api::{
    Endpoint, Error, MessageSender, Packet, Result, SocketCreationExt, StateSender, Transport,
};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_RECEIVE_BUFFER_LENGTH, Slot, bind, default_receive_buffer_length, receive_loop};
use crate::lifecycle::{self, Driver, Lifecycle};

/// Parameters of a [`UdpMulticast`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdpMulticastConfig {
    /// The group to join, its port is the local port to bind.
    pub group: Endpoint,

    /// Local IPv4 interface used to join and send, any interface by default.
    ///
    /// Ignored for IPv6 groups.
    #[serde(default = "any_interface")]
    pub interface: Ipv4Addr,

    /// Upper bound for the size of one delivered message.
    #[serde(default = "default_receive_buffer_length")]
    pub receive_buffer_length: usize,
}

fn any_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl UdpMulticastConfig {
    /// Creates a configuration joining `group` on any interface.
    pub fn new(group: impl Into<Endpoint>) -> Self {
        Self {
            group: group.into(),
            interface: any_interface(),
            receive_buffer_length: DEFAULT_RECEIVE_BUFFER_LENGTH,
        }
    }
}

/// A member of a UDP multicast group.
///
/// The socket binds the group port on all interfaces with address reuse, so several members may run on one host.
/// Loopback is enabled, a member receives its own datagrams. On Linux a member only receives the group it joined,
/// even when other groups are joined on the same port. `write` sends to the group, `write_packet` to any
/// address.
#[derive(Debug)]
pub struct UdpMulticast {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: UdpMulticastConfig,
    lifecycle: Lifecycle,
    slot: Slot,
    /// Group address and port while joined.
    joined: Mutex<Option<SocketAddr>>,
}

impl UdpMulticast {
    /// Creates a new, not yet started `UdpMulticast`.
    pub fn new(config: UdpMulticastConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new("udp-multicast"),
                slot: Slot::default(),
                joined: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UdpMulticastConfig {
        &self.inner.config
    }

    /// Returns the destination of `write` while joined.
    pub fn group(&self) -> Option<SocketAddr> {
        *self.inner.joined.lock().unwrap()
    }
}

impl Drop for UdpMulticast {
    fn drop(&mut self) {
        self.inner.lifecycle.close();
    }
}

impl Inner {
    fn join(&self, socket: &UdpSocket, group: IpAddr) -> std::io::Result<()> {
        let interface = self.config.interface;
        match group {
            IpAddr::V4(group) => {
                socket.join_multicast_v4(group, interface)?;
                socket.set_multicast_loop_v4(true)?;
                if !interface.is_unspecified() {
                    socket2::SockRef::from(socket).set_multicast_if_v4(&interface)?;
                }
                // Linux otherwise delivers every group joined on the host to all sockets on the port.
                #[cfg(target_os = "linux")]
                socket2::SockRef::from(socket).set_multicast_all_v4(false)?;
            }
            IpAddr::V6(group) => {
                socket.join_multicast_v6(&group, 0)?;
                socket.set_multicast_loop_v6(true)?;
                #[cfg(target_os = "linux")]
                socket2::SockRef::from(socket).set_multicast_all_v6(false)?;
            }
        }
        Ok(())
    }

    fn leave(&self, socket: &UdpSocket, group: IpAddr) -> std::io::Result<()> {
        match group {
            IpAddr::V4(group) => socket.leave_multicast_v4(group, self.config.interface),
            IpAddr::V6(group) => socket.leave_multicast_v6(&group, 0),
        }
    }
}

impl Driver for Inner {
    type Socket = (UdpSocket, SocketAddr);

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn create_socket(&self) -> Result<(UdpSocket, SocketAddr)> {
        let endpoint = &self.config.group;
        let group = endpoint.resolve().await.creating(endpoint)?.ip();
        if !group.is_multicast() {
            return Err(Error::InvalidGroup(group));
        }

        let any: IpAddr = match group {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let address = SocketAddr::new(any, endpoint.port());

        let socket = bind(address, true).creating(address)?;
        self.join(&socket, group).creating(endpoint)?;

        // Sends go to the group on the port actually bound, members bound to port 0 only talk to themselves.
        let port = socket.local_addr().creating(address)?.port();
        Ok((socket, SocketAddr::new(group, port)))
    }

    async fn run(
        self: Arc<Self>,
        (socket, group): (UdpSocket, SocketAddr),
        cycle: CancellationToken,
    ) -> Result<()> {
        let socket = Arc::new(socket);
        tracing::info!(%group, "joined");
        self.slot.set(socket.clone());
        *self.joined.lock().unwrap() = Some(group);

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

        self.joined.lock().unwrap().take();
        self.slot.clear();
        if let Err(error) = self.leave(&socket, group.ip()) {
            tracing::warn!(?error, %group, "failed to leave group");
        }
        Ok(result?)
    }
}

impl Transport for UdpMulticast {
    type Socket = (UdpSocket, SocketAddr);

    fn create_socket(&self) -> impl Future<Output = Result<Self::Socket>> + Send {
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
        self.is_started() && self.group().is_some()
    }

    fn is_closed(&self) -> bool {
        !self.is_started()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.slot.local_addr()
    }

    async fn write(&self, data: Vec<u8>) {
        let Some(group) = self.group() else {
            self.inner.lifecycle.not_started();
            return;
        };
        self.inner
            .slot
            .send_to(&self.inner.lifecycle, &data, group)
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
