use serde::{Deserialize, Serialize};

use crate::{
    TcpClientConfig, TcpServerConfig, UdpClientConfig, UdpMulticastConfig, UdpServerConfig,
};

/// The configuration of any transport, tagged by `kind`.
///
/// ```toml
/// kind = "tcp-server"
/// port = 9002
/// max_connections = 8
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// See [`TcpClient`](crate::TcpClient).
    TcpClient(TcpClientConfig),
    /// See [`TcpServer`](crate::TcpServer).
    TcpServer(TcpServerConfig),
    /// See [`UdpClient`](crate::UdpClient).
    UdpClient(UdpClientConfig),
    /// See [`UdpServer`](crate::UdpServer).
    UdpServer(UdpServerConfig),
    /// See [`UdpMulticast`](crate::UdpMulticast).
    Multicast(UdpMulticastConfig),
}

impl TransportConfig {
    /// Returns the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::TcpClient(_) => "tcp-client",
            TransportConfig::TcpServer(_) => "tcp-server",
            TransportConfig::UdpClient(_) => "udp-client",
            TransportConfig::UdpServer(_) => "udp-server",
            TransportConfig::Multicast(_) => "multicast",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::TransportConfig;
    use crate::{TcpServerConfig, UdpMulticastConfig};

    #[test]
    fn parses_every_kind() {
        let cases = [
            (
                r#"
                kind = "tcp-client"
                remote = "example.com:80"
                connect_timeout = 2
                "#,
                "tcp-client",
            ),
            (
                r#"
                kind = "tcp-server"
                port = 9002
                "#,
                "tcp-server",
            ),
            (
                r#"
                kind = "udp-client"
                remote = "255.255.255.255:9000"
                local_port = 9001
                "#,
                "udp-client",
            ),
            (
                r#"
                kind = "udp-server"
                bind = "127.0.0.1"
                port = 9000
                "#,
                "udp-server",
            ),
            (
                r#"
                kind = "multicast"
                group = "239.255.0.1:30490"
                "#,
                "multicast",
            ),
        ];

        for (source, kind) in cases {
            let config: TransportConfig = toml::from_str(source).unwrap();
            assert_eq!(config.kind(), kind);
        }
    }

    #[test]
    fn applies_defaults() {
        let config: TransportConfig = toml::from_str(
            r#"
            kind = "tcp-server"
            port = 9002
            "#,
        )
        .unwrap();
        assert_eq!(config, TransportConfig::TcpServer(TcpServerConfig::new(9002)));

        let config: TransportConfig = toml::from_str(
            r#"
            kind = "multicast"
            group = "239.255.0.1:30490"
            interface = "192.168.1.10"
            "#,
        )
        .unwrap();
        let TransportConfig::Multicast(UdpMulticastConfig {
            interface,
            receive_buffer_length,
            ..
        }) = config
        else {
            panic!("unexpected kind");
        };
        assert_eq!(interface, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(receive_buffer_length, 1460);

        let config: TransportConfig = toml::from_str(
            r#"
            kind = "tcp-client"
            remote = "localhost:9002"
            "#,
        )
        .unwrap();
        let TransportConfig::TcpClient(client) = config else {
            panic!("unexpected kind");
        };
        assert_eq!(client.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(toml::from_str::<TransportConfig>(r#"kind = "sctp""#).is_err());
        assert!(toml::from_str::<TransportConfig>("port = 9002").is_err());
        assert!(
            toml::from_str::<TransportConfig>(
                r#"
                kind = "udp-client"
                remote = "no-port"
                "#
            )
            .is_err()
        );
    }
}
