//! The ASocket transport API.
//!
//! One contract for TCP clients, TCP servers, UDP clients, UDP servers and UDP multicast members, so a caller can swap
//! one transport for another without touching its call sites.
//!
//! To get started, see [`Transport`].

#![forbid(unsafe_code)]

mod endpoint;
mod error;
mod event;
pub mod transport;

pub use endpoint::{Endpoint, EndpointParseError};
pub use error::{Error, Result, SocketCreationExt};
pub use event::{Message, MessageSender, Packet, StateEvent, StateSender};
pub use transport::Transport;
