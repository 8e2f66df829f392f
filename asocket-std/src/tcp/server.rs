use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use asocket_api::{MessageSender, Packet, Result, SocketCreationExt, StateSender, Transport};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::{DEFAULT_READ_BUFFER_LENGTH, Writer, read_loop};
use crate::lifecycle::{self, Driver, Lifecycle};

/// Default length of the pending connection queue.
pub const DEFAULT_BACKLOG: u32 = 50;

/// Parameters of a [`TcpServer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TcpServerConfig {
    /// Local address to listen on, all IPv4 interfaces by default.
    #[serde(default = "unspecified")]
    pub bind: IpAddr,

    /// Local port to listen on, `0` picks a free one.
    pub port: u16,

    /// Length of the pending connection queue.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Number of peers served at once, further connections wait in the backlog.
    ///
    /// Defaults to `backlog`.
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Upper bound for the size of one delivered message.
    #[serde(default = "default_read_buffer_length")]
    pub read_buffer_length: usize,
}

fn unspecified() -> IpAddr {
    Ipv4Addr::UNSPECIFIED.into()
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_read_buffer_length() -> usize {
    DEFAULT_READ_BUFFER_LENGTH
}

impl TcpServerConfig {
    /// Creates a configuration listening on all IPv4 interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            bind: unspecified(),
            port,
            backlog: DEFAULT_BACKLOG,
            max_connections: None,
            read_buffer_length: DEFAULT_READ_BUFFER_LENGTH,
        }
    }

    /// Returns the address to listen on.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    fn max_connections(&self) -> usize {
        self.max_connections
            .unwrap_or(self.backlog as usize)
            .max(1)
    }
}

/// A TCP listener serving any number of peers.
///
/// Every accepted peer is kept in a registry keyed by its remote address for exactly as long as its connection is
/// open. `write` sends to every registered peer. `write_packet` sends to the peer registered under the packet address
/// and falls back to every peer when there is none.
#[derive(Debug)]
pub struct TcpServer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: TcpServerConfig,
    lifecycle: Lifecycle,
    registry: Mutex<HashMap<SocketAddr, Writer>>,
    local: Mutex<Option<SocketAddr>>,
}

/// IPv4 peers accepted on a dual-stack listener show up as mapped IPv6 addresses.
fn canonical(address: SocketAddr) -> SocketAddr {
    SocketAddr::new(address.ip().to_canonical(), address.port())
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

impl TcpServer {
    /// Creates a new, not yet started `TcpServer`.
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new("tcp-server"),
                registry: Mutex::new(HashMap::new()),
                local: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TcpServerConfig {
        &self.inner.config
    }

    /// Returns the remote addresses of the connected peers, sorted.
    pub fn peers(&self) -> Vec<SocketAddr> {
        let mut peers: Vec<_> = self.inner.registry.lock().unwrap().keys().copied().collect();
        peers.sort();
        peers
    }

    /// Returns the number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.registry.lock().unwrap().len()
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.inner.lifecycle.close();
    }
}

impl Inner {
    async fn accept_loop(
        self: &Arc<Self>,
        listener: &TcpListener,
        peers: &TaskTracker,
        cycle: &CancellationToken,
    ) -> io::Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.max_connections()));
        loop {
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => permit,
                _ = cycle.cancelled() => return Ok(()),
            };
            let Ok(permit) = permit else {
                return Ok(());
            };

            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) if is_transient(&error) => {
                        tracing::warn!(?error, "failed to accept a connection");
                        continue;
                    }
                    Err(error) => return Err(error),
                },
                _ = cycle.cancelled() => return Ok(()),
            };

            let peer = canonical(peer);
            let span = tracing::info_span!("peer", %peer);
            let server = self.clone();
            let cycle = cycle.child_token();
            peers.spawn(
                async move {
                    server.serve_peer(stream, peer, cycle).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }

    async fn serve_peer(&self, stream: TcpStream, peer: SocketAddr, cycle: CancellationToken) {
        let (reader, writer) = stream.into_split();
        let writer = Writer::new(writer, cycle.clone());
        self.registry.lock().unwrap().insert(peer, writer.clone());
        tracing::info!("peer connected");

        let result = read_loop(
            reader,
            peer,
            self.config.read_buffer_length,
            &self.lifecycle,
            &cycle,
        )
        .await;
        if let Err(error) = result {
            tracing::warn!(?error, "peer connection failed");
        }

        {
            let mut registry = self.registry.lock().unwrap();
            if registry
                .get(&peer)
                .is_some_and(|current| current.same_connection(&writer))
            {
                registry.remove(&peer);
            }
        }
        tracing::info!("peer disconnected");
    }

    async fn send_to_peer(&self, peer: SocketAddr, writer: &Writer, data: &[u8]) {
        match writer.send(data).await {
            Some(Ok(())) => tracing::trace!(%peer, length = data.len(), "wrote"),
            Some(Err(error)) => {
                tracing::warn!(%peer, "write to peer failed");
                self.lifecycle.write_failed(error).await;
            }
            None => tracing::debug!(%peer, "write abandoned, the connection closed"),
        }
    }

    async fn broadcast(&self, data: &[u8]) {
        let peers: Vec<(SocketAddr, Writer)> = self
            .registry
            .lock()
            .unwrap()
            .iter()
            .map(|(peer, writer)| (*peer, writer.clone()))
            .collect();

        if peers.is_empty() {
            tracing::debug!("write ignored, no connected peers");
        }
        for (peer, writer) in peers {
            self.send_to_peer(peer, &writer, data).await;
        }
    }
}

impl Driver for Inner {
    type Socket = TcpListener;

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn create_socket(&self) -> Result<TcpListener> {
        let address = self.config.address();

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .creating(address)?;

        socket.set_reuseaddr(true).creating(address)?;
        socket.bind(address).creating(address)?;
        let listener = socket.listen(self.config.backlog).creating(address)?;

        Ok(listener)
    }

    async fn run(self: Arc<Self>, listener: TcpListener, cycle: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        *self.local.lock().unwrap() = Some(local);
        tracing::info!(%local, "listening");

        let peers = TaskTracker::new();
        let result = if self.lifecycle.enter().await {
            self.accept_loop(&listener, &peers, &cycle).await
        } else {
            Ok(())
        };
        drop(listener);

        // Stops the peer loops, each drops its connection on the way out.
        cycle.cancel();
        peers.close();
        peers.wait().await;

        self.registry.lock().unwrap().clear();
        self.local.lock().unwrap().take();
        Ok(result?)
    }
}

impl Transport for TcpServer {
    type Socket = TcpListener;

    fn create_socket(&self) -> impl Future<Output = Result<TcpListener>> + Send {
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
        self.is_started() && self.inner.local.lock().unwrap().is_some()
    }

    fn is_closed(&self) -> bool {
        !self.is_started()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local.lock().unwrap()
    }

    async fn write(&self, data: Vec<u8>) {
        if !self.is_started() {
            self.inner.lifecycle.not_started();
            return;
        }
        self.inner.broadcast(&data).await;
    }

    async fn write_packet(&self, packet: Packet) {
        if !self.is_started() {
            self.inner.lifecycle.not_started();
            return;
        }

        let peer = canonical(packet.address);
        let target = self.inner.registry.lock().unwrap().get(&peer).cloned();
        match target {
            Some(writer) => self.inner.send_to_peer(peer, &writer, &packet.data).await,
            None => {
                tracing::debug!(%peer, "unknown peer, writing to every peer");
                self.inner.broadcast(&packet.data).await;
            }
        }
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
