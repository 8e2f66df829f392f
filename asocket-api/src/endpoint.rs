//! Parsed-but-not-resolved `host:port` endpoints.

use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A remote endpoint given as a hostname or IP address plus a port.
///
/// Resolution is deferred until the transport needs the address, see [`Endpoint::resolve`].
///
/// IPv6 addresses are written with brackets, e.g. `[::1]:9000`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

/// Errors that can occur when parsing an [`Endpoint`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointParseError {
    /// Missing ':' separator between host and port.
    #[error("missing ':' separator")]
    MissingSeparator,

    /// The host part is empty.
    #[error("empty host")]
    EmptyHost,

    /// The host contains characters that are never valid in a hostname.
    #[error("invalid host {0:?}")]
    InvalidHost(String),

    /// Invalid port number format.
    #[error("invalid port number")]
    InvalidPort(#[source] std::num::ParseIntError),
}

impl Endpoint {
    /// Creates an endpoint from a host (hostname or IP literal without brackets) and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the IP address if the host is an IP literal.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Returns whether the host is an IPv6 literal.
    pub fn is_ipv6(&self) -> bool {
        matches!(self.ip(), Some(IpAddr::V6(_)))
    }

    /// Resolves the endpoint to the first address the system resolver returns.
    pub async fn resolve(&self) -> std::io::Result<SocketAddr> {
        if let Some(ip) = self.ip() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {self}"),
                )
            })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Endpoint { host, port } = self;
        if host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{host}]:{port}")
        } else {
            write!(f, "{host}:{port}")
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (host, port) = string
            .rsplit_once(':')
            .ok_or(EndpointParseError::MissingSeparator)?;

        let port = port.parse().map_err(EndpointParseError::InvalidPort)?;

        let host = match host.strip_prefix('[').and_then(|host| host.strip_suffix(']')) {
            Some(host) => {
                host.parse::<Ipv6Addr>()
                    .map_err(|_| EndpointParseError::InvalidHost(host.to_owned()))?;
                host
            }
            None => {
                if host.is_empty() {
                    return Err(EndpointParseError::EmptyHost);
                }
                // Unbracketed IPv6 is ambiguous with the port separator.
                if !host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                {
                    return Err(EndpointParseError::InvalidHost(host.to_owned()));
                }
                host
            }
        };

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        string.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(address: SocketAddr) -> Self {
        Self::new(address.ip().to_string(), address.port())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{Endpoint, EndpointParseError};

    #[test]
    fn parses_hostnames_and_literals() {
        let endpoint: Endpoint = "example.com:9002".parse().unwrap();
        assert_eq!(endpoint.host(), "example.com");
        assert_eq!(endpoint.port(), 9002);
        assert_eq!(endpoint.ip(), None);

        let endpoint: Endpoint = "192.168.1.255:9001".parse().unwrap();
        assert_eq!(endpoint.ip(), Some("192.168.1.255".parse().unwrap()));
        assert!(!endpoint.is_ipv6());

        let endpoint: Endpoint = "[ff02::1]:9003".parse().unwrap();
        assert_eq!(endpoint.host(), "ff02::1");
        assert!(endpoint.is_ipv6());
        assert_eq!(endpoint.to_string(), "[ff02::1]:9003");
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!(matches!(
            "localhost".parse::<Endpoint>(),
            Err(EndpointParseError::MissingSeparator)
        ));
        assert!(matches!(
            ":80".parse::<Endpoint>(),
            Err(EndpointParseError::EmptyHost)
        ));
        assert!(matches!(
            "localhost:http".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort(_))
        ));
        assert!(matches!(
            "2001:db8::cafe:80".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidHost(_))
        ));
        assert!(matches!(
            "[not-v6]:80".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidHost(_))
        ));
        assert!(matches!(
            "bad host:80".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidHost(_))
        ));
    }

    #[test]
    fn converts_from_socket_addresses() {
        let address: SocketAddr = "[::1]:7000".parse().unwrap();
        let endpoint = Endpoint::from(address);
        assert_eq!(endpoint.to_string(), "[::1]:7000");
        assert_eq!(endpoint.ip(), Some(address.ip()));
    }

    #[test]
    fn deserializes_from_strings() {
        let endpoint: Endpoint = serde_json::from_str(r#""239.0.0.1:9004""#).unwrap();
        assert_eq!(endpoint, Endpoint::new("239.0.0.1", 9004));
        assert!(serde_json::from_str::<Endpoint>(r#""239.0.0.1""#).is_err());
    }

    #[tokio::test]
    async fn resolves_ip_literals_without_lookup() {
        let endpoint: Endpoint = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            endpoint.resolve().await.unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
    }
}
