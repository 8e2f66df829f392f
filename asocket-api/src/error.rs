use std::net::IpAddr;

use crate::Endpoint;

/// A result with the [`Error`] error.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors reported by a transport.
///
/// Transports never return these to the caller of `start`, `close` or `write`; they are delivered through the state
/// listener as [`StateEvent::ExceptionRaised`](crate::StateEvent::ExceptionRaised).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The socket could not be resolved, bound, connected or joined.
    ///
    /// Fatal to the start attempt, the loop is never entered.
    #[error("failed to create socket for {address}")]
    SocketCreation {
        /// The address the socket was created for.
        address: String,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The remote endpoint of a write could not be resolved.
    #[error("failed to resolve {endpoint}")]
    Resolve {
        /// The endpoint that failed to resolve.
        endpoint: Endpoint,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The configured multicast group is not a multicast address.
    #[error("{0} is not a multicast address")]
    InvalidGroup(IpAddr),

    /// The transport is not started.
    #[error("the transport has not started")]
    NotStarted,

    /// Reading, receiving, accepting or sending failed on an established socket.
    #[error("socket i/o failed")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns whether this error happened while creating the socket.
    pub fn is_socket_creation(&self) -> bool {
        matches!(self, Error::SocketCreation { .. } | Error::InvalidGroup(_))
    }
}

/// Attaches the address being set up to socket creation failures.
pub trait SocketCreationExt<T> {
    /// Converts the failure into [`Error::SocketCreation`] for `address`.
    fn creating(self, address: impl core::fmt::Display) -> Result<T>;
}

impl<T> SocketCreationExt<T> for std::io::Result<T> {
    fn creating(self, address: impl core::fmt::Display) -> Result<T> {
        self.map_err(|source| Error::SocketCreation {
            address: address.to_string(),
            source,
        })
    }
}
