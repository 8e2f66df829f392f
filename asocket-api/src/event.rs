use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::Error;

/// Lifecycle events reported through the state listener.
///
/// Every start cycle reports at most one [`StateEvent::Started`] followed by at most one terminal
/// [`StateEvent::Closed`] or [`StateEvent::ExceptionRaised`]. Failed writes additionally report
/// [`StateEvent::ExceptionRaised`] without ending the cycle.
#[derive(Debug)]
pub enum StateEvent {
    /// The socket was created and the loop is running.
    Started,
    /// The loop ended and the socket was released.
    Closed,
    /// Creating the socket, running the loop or a write failed.
    ExceptionRaised(Error),
}

impl StateEvent {
    /// Returns whether the event ends a start cycle.
    ///
    /// Write failures are reported as [`StateEvent::ExceptionRaised`] as well, so check the transport state to tell
    /// them apart.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StateEvent::Started)
    }
}

/// A payload received by a transport.
///
/// No framing is applied: a TCP message is whatever one read returned, a UDP message is one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The received bytes.
    pub data: Vec<u8>,
    /// The address the bytes were received from.
    pub peer: SocketAddr,
}

impl Message {
    /// Creates a new `Message`.
    pub fn new(data: impl Into<Vec<u8>>, peer: SocketAddr) -> Self {
        Self {
            data: data.into(),
            peer,
        }
    }
}

/// An addressed payload for [`Transport::write_packet`](crate::Transport::write_packet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The bytes to send.
    pub data: Vec<u8>,
    /// Where to send them.
    pub address: SocketAddr,
}

impl Packet {
    /// Creates a new `Packet`.
    pub fn new(data: impl Into<Vec<u8>>, address: SocketAddr) -> Self {
        Self {
            data: data.into(),
            address,
        }
    }
}

/// Receives lifecycle events of a transport.
pub type StateSender = mpsc::Sender<StateEvent>;

/// Receives messages of a transport.
///
/// The loop waits for capacity before reading further, a listener that stops draining its channel therefore stalls
/// the transport.
pub type MessageSender = mpsc::Sender<Message>;
