//! `asocket` connects stdin and stdout to a TCP or UDP transport.
//!
//! Every input line is written to the transport, `@ip:port payload` writes to an explicit address. Received messages
//! are printed as `peer> payload`, state changes as `* state`.

#![forbid(unsafe_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use asocket_std::{
    Dispatcher, Endpoint, Event, StateEvent, TcpClient, TcpClientConfig, TcpServer,
    TcpServerConfig, Transport, TransportConfig, UdpClient, UdpClientConfig, UdpMulticast,
    UdpMulticastConfig, UdpServer, UdpServerConfig,
};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;

use self::input::Input;
use self::report::SpanReport;

mod input;
mod report;

#[derive(Parser, Debug)]
#[command(version, about, args_conflicts_with_subcommands = true)]
struct Arguments {
    /// Reads the transport from a TOML file, see `TransportConfig`.
    #[arg(long, env = "ASOCKET_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    transport: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connects to a TCP server.
    TcpClient {
        /// `host:port` of the server.
        remote: Endpoint,

        /// Seconds to wait for the connection.
        #[arg(long, default_value_t = 10)]
        connect_timeout: u64,
    },

    /// Accepts TCP peers, input is written to all of them.
    TcpServer {
        /// Port to listen on.
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Peers served at once.
        #[arg(long)]
        max_connections: Option<usize>,
    },

    /// Sends datagrams to a remote endpoint.
    UdpClient {
        /// `host:port` input is sent to.
        remote: Endpoint,

        /// Local port to bind, `0` picks a free one.
        #[arg(long, default_value_t = 0)]
        local_port: u16,
    },

    /// Receives datagrams, input is sent to whoever sent the last one.
    UdpServer {
        /// Port to bind.
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },

    /// Joins a multicast group, input is sent to the group.
    Multicast {
        /// `group:port` to join.
        group: Endpoint,

        /// Local IPv4 interface to join on.
        #[arg(long, default_value = "0.0.0.0")]
        interface: Ipv4Addr,
    },
}

impl Command {
    fn into_config(self) -> TransportConfig {
        match self {
            Command::TcpClient {
                remote,
                connect_timeout,
            } => TransportConfig::TcpClient(TcpClientConfig {
                connect_timeout: Duration::from_secs(connect_timeout),
                ..TcpClientConfig::new(remote)
            }),
            Command::TcpServer {
                port,
                bind,
                max_connections,
            } => TransportConfig::TcpServer(TcpServerConfig {
                bind,
                max_connections,
                ..TcpServerConfig::new(port)
            }),
            Command::UdpClient { remote, local_port } => {
                TransportConfig::UdpClient(UdpClientConfig {
                    local_port,
                    ..UdpClientConfig::new(remote)
                })
            }
            Command::UdpServer { port, bind } => TransportConfig::UdpServer(UdpServerConfig {
                bind,
                ..UdpServerConfig::new(port)
            }),
            Command::Multicast { group, interface } => {
                TransportConfig::Multicast(UdpMulticastConfig {
                    interface,
                    ..UdpMulticastConfig::new(group)
                })
            }
        }
    }
}

async fn load(path: &Utf8PathBuf) -> eyre::Result<TransportConfig> {
    let source = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("reading {path}"))?;
    toml::from_str(&source).wrap_err_with(|| format!("parsing {path}"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Arguments::parse();

    eyre::set_hook(Box::new(SpanReport::hook))?;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .with_env_var("ASOCKET_LOG")
                    .from_env()?,
            )
            .with_writer(std::io::stderr)
            .compact()
            .finish()
            .with(tracing_error::ErrorLayer::default()),
    )?;

    let config = match (args.config, args.transport) {
        (Some(path), _) => load(&path).await?,
        (None, Some(command)) => command.into_config(),
        (None, None) => eyre::bail!("either a transport subcommand or --config is required"),
    };
    tracing::info!(kind = config.kind(), "starting");

    match config {
        TransportConfig::TcpClient(config) => run(TcpClient::new(config)).await,
        TransportConfig::TcpServer(config) => run(TcpServer::new(config)).await,
        TransportConfig::UdpClient(config) => run(UdpClient::new(config)).await,
        TransportConfig::UdpServer(config) => run(UdpServer::new(config)).await,
        TransportConfig::Multicast(config) => run(UdpMulticast::new(config)).await,
    }
}

/// Pumps stdin into the transport and its events to stdout until either side ends.
async fn run<T: Transport>(transport: T) -> eyre::Result<()> {
    let (dispatcher, mut events) = Dispatcher::new(transport);
    dispatcher.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reading = true;
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    Event::Message(message) => {
                        let text = String::from_utf8_lossy(&message.data);
                        println!("{}> {}", message.peer, text.trim_end_matches(['\r', '\n']));
                    }
                    Event::State(StateEvent::Started) => println!("* started"),
                    Event::State(StateEvent::Closed) => {
                        println!("* closed");
                        break;
                    }
                    Event::State(StateEvent::ExceptionRaised(error)) => {
                        println!("* error: {error}");
                        tracing::warn!(?error, "transport reported a failure");
                        // Write failures keep the transport running.
                        if !dispatcher.is_started() {
                            failed = true;
                            break;
                        }
                    }
                }
            }
            line = lines.next_line(), if reading => {
                match line.wrap_err("reading from stdin")? {
                    Some(line) => match Input::parse(&line) {
                        Ok(Input::Data(data)) => dispatcher.write(data),
                        Ok(Input::Packet(packet)) => dispatcher.write_packet(packet),
                        Err(error) => tracing::warn!("{error:#}"),
                    },
                    None => {
                        tracing::info!("end of input, closing");
                        reading = false;
                        dispatcher.close();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl-C, closing");
                dispatcher.close();
            }
        }
    }

    if failed {
        eyre::bail!("the transport failed");
    }
    Ok(())
}
