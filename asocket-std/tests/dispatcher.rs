#![expect(missing_docs, reason = "test")]

use std::time::Duration;

use asocket_std::{
    Dispatcher, Event, Message, StateEvent, TcpClient, TcpClientConfig, TcpServer, TcpServerConfig,
    Transport, UdpServer, UdpServerConfig,
};
use tokio::sync::mpsc;

async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("dispatcher stopped")
}

async fn expect_state(events: &mut mpsc::Receiver<Event>, expected: fn(&StateEvent) -> bool) {
    let event = next_event(events).await;
    assert!(
        matches!(&event, Event::State(state) if expected(state)),
        "unexpected {event:?}"
    );
}

async fn expect_message(events: &mut mpsc::Receiver<Event>) -> Message {
    match next_event(events).await {
        Event::Message(message) => message,
        event => panic!("expected a message, got {event:?}"),
    }
}

#[tokio::test]
async fn dispatcher_tcp_conversation() {
    let (server, mut server_events) = Dispatcher::new(TcpServer::new(TcpServerConfig {
        bind: "127.6.0.1".parse().unwrap(),
        ..TcpServerConfig::new(0)
    }));
    server.start();
    expect_state(&mut server_events, |state| matches!(state, StateEvent::Started)).await;
    assert!(server.is_started());
    let address = server.transport().local_addr().unwrap();

    let (client, mut client_events) = Dispatcher::new(TcpClient::new(TcpClientConfig::new(address)));
    client.start();
    expect_state(&mut client_events, |state| matches!(state, StateEvent::Started)).await;
    assert!(client.is_connected());

    client.write("hello");
    let message = expect_message(&mut server_events).await;
    assert_eq!(message.data, b"hello");
    assert_eq!(Some(message.peer), client.transport().local_addr());

    server.write(b"welcome".to_vec());
    assert_eq!(expect_message(&mut client_events).await.data, b"welcome");

    client.close();
    expect_state(&mut client_events, |state| matches!(state, StateEvent::Closed)).await;
    assert!(client.is_closed());
    assert!(client_events.recv().await.is_none());

    server.close();
    expect_state(&mut server_events, |state| matches!(state, StateEvent::Closed)).await;
    assert!(server_events.recv().await.is_none());
}

#[tokio::test]
async fn dispatcher_ignores_commands_after_close() {
    let (server, mut events) = Dispatcher::new(UdpServer::new(UdpServerConfig {
        bind: "127.6.0.2".parse().unwrap(),
        ..UdpServerConfig::new(0)
    }));

    server.close();
    server.start();
    server.write("dropped");

    // The transport never started, the worker gives up waiting for its end after a grace period.
    assert!(
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .is_none()
    );
    assert!(!server.is_started());
}

#[test]
fn dispatcher_without_runtime() {
    let (server, mut events) = Dispatcher::new(UdpServer::new(UdpServerConfig {
        bind: "127.6.0.3".parse().unwrap(),
        ..UdpServerConfig::new(0)
    }));

    server.start();
    assert!(matches!(
        events.blocking_recv(),
        Some(Event::State(StateEvent::Started))
    ));
    let address = server.transport().local_addr().unwrap();

    let socket = std::net::UdpSocket::bind("127.6.0.3:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    socket.send_to(b"sync", address).unwrap();
    let Some(Event::Message(message)) = events.blocking_recv() else {
        panic!("expected a message");
    };
    assert_eq!(message.data, b"sync");
    assert_eq!(message.peer, socket.local_addr().unwrap());

    server.write("reply");
    let mut buffer = [0; 8];
    let (length, sender) = socket.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..length], b"reply");
    assert_eq!(sender, address);

    server.close();
    assert!(matches!(
        events.blocking_recv(),
        Some(Event::State(StateEvent::Closed))
    ));
    assert!(events.blocking_recv().is_none());
}
