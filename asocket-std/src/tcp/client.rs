use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asocket_api::{
    Endpoint, MessageSender, Packet, Result, SocketCreationExt, StateSender, Transport,
};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::{DEFAULT_READ_BUFFER_LENGTH, Writer, read_loop};
use crate::lifecycle::{self, Driver, Lifecycle};

/// Default bound for establishing the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of a [`TcpClient`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TcpClientConfig {
    /// The server to connect to.
    pub remote: Endpoint,

    /// How long connecting may take, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Upper bound for the size of one delivered message.
    #[serde(default = "default_read_buffer_length")]
    pub read_buffer_length: usize,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_read_buffer_length() -> usize {
    DEFAULT_READ_BUFFER_LENGTH
}

impl TcpClientConfig {
    /// Creates a configuration connecting to `remote` with default settings.
    pub fn new(remote: impl Into<Endpoint>) -> Self {
        Self {
            remote: remote.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer_length: DEFAULT_READ_BUFFER_LENGTH,
        }
    }
}

/// A single outgoing TCP connection.
///
/// `write` and `write_packet` both send to the connected server, the packet address is ignored.
///
/// ```no_run
/// use asocket_std::{TcpClient, TcpClientConfig, Transport};
///
/// # async fn example() {
/// let client = TcpClient::new(TcpClientConfig::new("127.0.0.1:9002".parse::<asocket_std::Endpoint>().unwrap()));
/// client.start();
/// // Wait for `StateEvent::Started` on the state listener, then:
/// client.write(b"hello".to_vec()).await;
/// # }
/// ```
#[derive(Debug)]
pub struct TcpClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: TcpClientConfig,
    lifecycle: Lifecycle,
    connection: Mutex<Option<Connection>>,
}

#[derive(Debug, Clone)]
struct Connection {
    writer: Writer,
    local: SocketAddr,
    peer: SocketAddr,
}

impl TcpClient {
    /// Creates a new, not yet started `TcpClient`.
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new("tcp-client"),
                connection: Mutex::new(None),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TcpClientConfig {
        &self.inner.config
    }

    /// Returns the address of the connected server while started.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .map(|connection| connection.peer)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.inner.lifecycle.close();
    }
}

impl Driver for Inner {
    type Socket = TcpStream;

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn create_socket(&self) -> Result<TcpStream> {
        let remote = &self.config.remote;
        let address = remote.resolve().await.creating(remote)?;

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
            .creating(address)?;

        socket2::SockRef::from(&stream)
            .set_keepalive(true)
            .creating(address)?;

        Ok(stream)
    }

    async fn run(self: Arc<Self>, stream: TcpStream, cycle: CancellationToken) -> Result<()> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        tracing::info!(%local, %peer, "connected");

        let (reader, writer) = stream.into_split();
        *self.connection.lock().unwrap() = Some(Connection {
            writer: Writer::new(writer, cycle.clone()),
            local,
            peer,
        });

        let result = if self.lifecycle.enter().await {
            read_loop(
                reader,
                peer,
                self.config.read_buffer_length,
                &self.lifecycle,
                &cycle,
            )
            .await
        } else {
            Ok(())
        };

        self.connection.lock().unwrap().take();
        Ok(result?)
    }
}

impl Transport for TcpClient {
    type Socket = TcpStream;

    fn create_socket(&self) -> impl Future<Output = Result<TcpStream>> + Send {
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
        self.is_started() && self.inner.connection.lock().unwrap().is_some()
    }

    fn is_closed(&self) -> bool {
        !self.is_started()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .connection
            .lock()
            .unwrap()
            .as_ref()
            .map(|connection| connection.local)
    }

    async fn write(&self, data: Vec<u8>) {
        if !self.is_started() {
            self.inner.lifecycle.not_started();
            return;
        }

        let connection = self.inner.connection.lock().unwrap().clone();
        let Some(connection) = connection else {
            tracing::debug!("write ignored, the connection is shut down");
            return;
        };

        match connection.writer.send(&data).await {
            Some(Ok(())) => tracing::trace!(peer = %connection.peer, length = data.len(), "wrote"),
            Some(Err(error)) => self.inner.lifecycle.write_failed(error).await,
            None => tracing::debug!("write abandoned, the transport closed"),
        }
    }

    async fn write_packet(&self, packet: Packet) {
        self.write(packet.data).await;
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TcpClientConfig;

    #[test]
    fn config_defaults() {
        let config: TcpClientConfig = serde_json::from_str(r#"{"remote": "localhost:9002"}"#).unwrap();
        assert_eq!(config.remote.host(), "localhost");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_buffer_length, 4096);

        let config: TcpClientConfig = serde_json::from_str(
            r#"{"remote": "[::1]:9002", "connect_timeout": 3, "read_buffer_length": 512}"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.read_buffer_length, 512);
        assert!(config.remote.is_ipv6());
    }
}
