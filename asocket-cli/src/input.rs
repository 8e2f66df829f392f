//! Turning stdin lines into writes.

use std::net::SocketAddr;

use asocket_std::Packet;
use eyre::WrapErr;

/// What to do with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Input {
    /// Write to the default destination of the transport.
    Data(Vec<u8>),
    /// Write to an explicit address, from `@ip:port payload`.
    Packet(Packet),
}

impl Input {
    /// Parses a line without its line ending, the payload is sent with a `\n` appended.
    ///
    /// A leading `@@` escapes a payload that starts with `@`.
    pub(crate) fn parse(line: &str) -> eyre::Result<Self> {
        let Some(rest) = line.strip_prefix('@') else {
            return Ok(Input::Data(terminated(line)));
        };
        if rest.starts_with('@') {
            return Ok(Input::Data(terminated(rest)));
        }

        let (address, payload) = rest.split_once(' ').unwrap_or((rest, ""));
        let address: SocketAddr = address
            .parse()
            .wrap_err_with(|| format!("invalid packet address {address:?}, expected `@ip:port`"))?;

        Ok(Input::Packet(Packet::new(terminated(payload), address)))
    }
}

fn terminated(payload: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 1);
    data.extend_from_slice(payload.as_bytes());
    data.push(b'\n');
    data
}
