//! ASocket transports for `std`.
//!
//! Implements [`asocket_api::Transport`] for TCP and UDP on top of tokio, with socket2 for the socket options tokio
//! does not expose.
//!
//! | transport           | default `write` destination          |
//! |---------------------|--------------------------------------|
//! | [`TcpClient`]       | the connected server                 |
//! | [`TcpServer`]       | every connected peer                 |
//! | [`UdpClient`]       | the configured remote endpoint       |
//! | [`UdpMulticast`]    | the joined group                     |
//! | [`UdpServer`]       | the sender of the last datagram      |
//!
//! [`Dispatcher`] wraps any transport behind a synchronous, thread-safe façade.

#![forbid(unsafe_code)]

mod config;
mod dispatcher;
mod executor;
mod lifecycle;
pub mod tcp;
pub mod udp;

pub use asocket_api::{
    Endpoint, Error, Message, MessageSender, Packet, Result, StateEvent, StateSender, Transport,
};
pub use config::TransportConfig;
pub use dispatcher::{Dispatcher, Event};
pub use tcp::{TcpClient, TcpClientConfig, TcpServer, TcpServerConfig};
pub use udp::{UdpClient, UdpClientConfig, UdpMulticast, UdpMulticastConfig, UdpServer, UdpServerConfig};

// Sized for interactive use, producers wait when it fills up.
pub(crate) const ARBITRARY_CHANNEL_BUFFER: usize = 16;
