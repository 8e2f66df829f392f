#![expect(missing_docs, reason = "test")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use asocket_api::transport::test_suite::{self, Probe};
use asocket_std::{
    Error, Packet, StateEvent, TcpClient, TcpClientConfig, TcpServer, TcpServerConfig, Transport,
};
use tokio::io::AsyncReadExt;
use tracing_test::traced_test;

fn server(ip: &str) -> TcpServer {
    TcpServer::new(TcpServerConfig {
        bind: ip.parse().unwrap(),
        ..TcpServerConfig::new(0)
    })
}

fn client(address: SocketAddr) -> TcpClient {
    TcpClient::new(TcpClientConfig::new(address))
}

/// Polls `condition` until it holds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Starts `transport` and waits until it reports so.
async fn started(transport: &impl Transport) -> Probe {
    let mut probe = Probe::attach(transport);
    transport.start();
    probe.expect_started().await;
    probe
}

#[tokio::test]
async fn tcp_server_close_before_start() {
    test_suite::test_close_before_start(server("127.4.0.1")).await;
}

#[tokio::test]
async fn tcp_server_start_twice() {
    test_suite::test_start_twice(server("127.4.0.2")).await;
}

#[tokio::test]
async fn tcp_server_write_after_close() {
    test_suite::test_write_after_close(server("127.4.0.3")).await;
}

#[tokio::test]
async fn tcp_server_restart_after_close() {
    test_suite::test_restart_after_close(server("127.4.0.4")).await;
}

#[tokio::test]
async fn tcp_client_close_before_start() {
    test_suite::test_close_before_start(client("127.4.0.5:1".parse().unwrap())).await;
}

#[tokio::test]
async fn tcp_client_start_twice() {
    let listener = tokio::net::TcpListener::bind("127.4.0.6:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    test_suite::test_start_twice(client(address)).await;
}

#[tokio::test]
async fn tcp_client_write_after_close() {
    let listener = tokio::net::TcpListener::bind("127.4.0.7:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    test_suite::test_write_after_close(client(address)).await;
}

#[tokio::test]
async fn tcp_client_restart_after_close() {
    let listener = tokio::net::TcpListener::bind("127.4.0.18:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    test_suite::test_restart_after_close(client(address)).await;
}

#[tokio::test]
async fn tcp_round_trip_v4() {
    test_suite::test_round_trip(server("127.4.0.8"), client).await;
}

#[tokio::test]
async fn tcp_round_trip_v6() {
    test_suite::test_round_trip(server("::1"), client).await;
}

#[tokio::test]
async fn tcp_registry_follows_connections() {
    let server = server("127.4.0.9");
    let mut server_probe = started(&server).await;
    let address = server.local_addr().unwrap();
    assert!(server.is_connected());

    let clients = [client(address), client(address), client(address)];
    let mut client_probes = Vec::new();
    for client in &clients {
        client_probes.push(started(client).await);
    }
    eventually(|| server.peer_count() == 3).await;

    let mut expected: Vec<_> = clients.iter().map(|client| client.local_addr().unwrap()).collect();
    expected.sort();
    assert_eq!(server.peers(), expected);

    clients[0].write(b"ping".to_vec()).await;
    let message = server_probe.next_message().await;
    assert_eq!(message.data, b"ping");
    assert_eq!(message.peer, clients[0].local_addr().unwrap());

    let leaving = clients[1].local_addr().unwrap();
    clients[1].close();
    client_probes[1].expect_closed().await;
    eventually(|| server.peer_count() == 2).await;
    assert!(!server.peers().contains(&leaving));

    server.close();
    server_probe.expect_closed().await;
    assert_eq!(server.peer_count(), 0);
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn tcp_server_addressed_write() {
    let server = server("127.4.0.10");
    let _server_probe = started(&server).await;
    let address = server.local_addr().unwrap();

    let first = client(address);
    let second = client(address);
    let mut first_probe = started(&first).await;
    let mut second_probe = started(&second).await;
    eventually(|| server.peer_count() == 2).await;

    server
        .write_packet(Packet::new(*b"only first", first.local_addr().unwrap()))
        .await;
    assert_eq!(first_probe.receive_bytes(10).await, b"only first");
    second_probe.assert_no_message().await;

    server
        .write_packet(Packet::new(*b"unknown", "127.4.0.10:1".parse().unwrap()))
        .await;
    assert_eq!(first_probe.receive_bytes(7).await, b"unknown");
    assert_eq!(second_probe.receive_bytes(7).await, b"unknown");

    server.write(b"everyone".to_vec()).await;
    assert_eq!(first_probe.receive_bytes(8).await, b"everyone");
    assert_eq!(second_probe.receive_bytes(8).await, b"everyone");
}

#[tokio::test]
async fn tcp_client_ignores_packet_address() {
    let server = server("127.4.0.11");
    let mut server_probe = started(&server).await;

    let client = client(server.local_addr().unwrap());
    let _client_probe = started(&client).await;

    client
        .write_packet(Packet::new(*b"somewhere", "192.0.2.1:9".parse().unwrap()))
        .await;
    assert_eq!(server_probe.receive_bytes(9).await, b"somewhere");
}

#[tokio::test]
async fn tcp_client_closes_when_server_goes_away() {
    let server = server("127.4.0.12");
    let mut server_probe = started(&server).await;

    let client = client(server.local_addr().unwrap());
    let mut client_probe = started(&client).await;
    assert!(client.is_connected());
    assert_eq!(client.peer_addr(), server.local_addr());
    eventually(|| server.peer_count() == 1).await;

    server.close();
    server_probe.expect_closed().await;
    client_probe.expect_closed().await;
    assert!(client.is_closed());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn tcp_client_connect_refused() {
    let address = {
        let listener = tokio::net::TcpListener::bind("127.4.0.13:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = client(address);
    let mut probe = Probe::attach(&client);
    client.start();

    let event = probe.next_state().await;
    assert!(
        matches!(event, StateEvent::ExceptionRaised(Error::SocketCreation { .. })),
        "{event:?}"
    );
    assert!(client.is_closed());
    probe.assert_no_state().await;
}

#[tokio::test]
async fn tcp_server_port_in_use() {
    let listener = tokio::net::TcpListener::bind("127.4.0.14:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = TcpServer::new(TcpServerConfig {
        bind: "127.4.0.14".parse().unwrap(),
        ..TcpServerConfig::new(port)
    });
    let mut probe = Probe::attach(&server);
    server.start();

    let event = probe.next_state().await;
    assert!(
        matches!(event, StateEvent::ExceptionRaised(Error::SocketCreation { .. })),
        "{event:?}"
    );
    assert!(!server.is_started());
}

#[tokio::test]
async fn tcp_server_limits_concurrent_peers() {
    let server = TcpServer::new(TcpServerConfig {
        bind: "127.4.0.15".parse().unwrap(),
        max_connections: Some(1),
        ..TcpServerConfig::new(0)
    });
    let _server_probe = started(&server).await;
    let address = server.local_addr().unwrap();

    let first = client(address);
    let mut first_probe = started(&first).await;
    eventually(|| server.peer_count() == 1).await;

    // Connects through the backlog but is not served until the first peer leaves.
    let second = client(address);
    let _second_probe = started(&second).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.peers(), [first.local_addr().unwrap()]);

    first.close();
    first_probe.expect_closed().await;
    eventually(|| server.peers() == [second.local_addr().unwrap()]).await;
}

#[tokio::test]
#[traced_test]
async fn tcp_write_before_start_is_only_logged() {
    let client = client("127.4.0.16:1".parse().unwrap());
    let mut probe = Probe::attach(&client);

    client.write(b"too early".to_vec()).await;

    probe.assert_no_state().await;
    assert!(logs_contain("write ignored"));
}

#[tokio::test]
async fn tcp_close_abandons_pending_writes() {
    const LENGTH: usize = 64 * 1024 * 1024;

    let server = Arc::new(server("127.4.0.17"));
    let mut server_probe = started(&*server).await;

    // Never reads while the server writes, so the write stalls once the socket buffers are full.
    let mut peer = tokio::net::TcpStream::connect(server.local_addr().unwrap())
        .await
        .unwrap();
    eventually(|| server.peer_count() == 1).await;

    let writing = tokio::spawn({
        let server = server.clone();
        async move { server.write(vec![0; LENGTH]).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!writing.is_finished());

    server.close();
    server_probe.expect_closed().await;
    tokio::time::timeout(Duration::from_secs(5), writing)
        .await
        .expect("write still pending after close")
        .unwrap();

    let mut buffer = vec![0; 64 * 1024];
    let mut received = 0;
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(read @ 1..) = peer.read(&mut buffer).await {
            received += read;
        }
    })
    .await
    .expect("connection was not shut down");
    assert!(received < LENGTH, "received all {received} bytes");
}
