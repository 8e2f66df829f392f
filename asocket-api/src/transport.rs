//! The transport contract.
//!
//! To get started, see [`Transport`].

use std::net::SocketAddr;

use crate::{MessageSender, Packet, Result, StateSender};

/// A socket transport driven by a background loop.
///
/// `start` and `close` return immediately; the outcome is reported through the state listener. Received payloads are
/// delivered through the message listener. Errors are never returned to the caller, the state listener is the only
/// channel they surface on.
///
/// # Example
///
/// ```no_run
/// use asocket_api::{Packet, StateEvent, Transport};
///
/// async fn echo(transport: impl Transport) {
///     let (state_tx, mut state_rx) = tokio::sync::mpsc::channel(16);
///     let (message_tx, mut message_rx) = tokio::sync::mpsc::channel(16);
///     transport.set_state_listener(state_tx);
///     transport.set_message_listener(message_tx);
///
///     transport.start();
///     let Some(StateEvent::Started) = state_rx.recv().await else {
///         return;
///     };
///
///     while let Some(message) = message_rx.recv().await {
///         transport.write_packet(Packet::new(message.data, message.peer)).await;
///     }
/// }
/// ```
pub trait Transport: core::fmt::Debug + Send + Sync + 'static {
    /// The socket created for one start cycle.
    type Socket: Send + 'static;

    /// Creates, binds and (for TCP clients) connects the socket.
    ///
    /// Called by [`Transport::start`]; exposed so a caller can check its parameters up front.
    fn create_socket(&self) -> impl Future<Output = Result<Self::Socket>> + Send;

    /// Creates the socket and spawns the loop on the executor.
    ///
    /// No-op unless the transport is fully closed.
    fn start(&self);

    /// Stops the loop, which then releases the socket.
    ///
    /// Idempotent, a no-op if the transport is not started.
    fn close(&self);

    /// Returns whether the socket is created and the loop is running.
    fn is_started(&self) -> bool;

    /// Returns whether the transport can currently reach a peer.
    fn is_connected(&self) -> bool;

    /// Returns whether there is no live socket, or it is being released.
    fn is_closed(&self) -> bool;

    /// Returns the local address of the socket while started.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Sends `data` to the transport's default destination.
    ///
    /// Ignored if the transport is not started. Failures are reported through the state listener.
    fn write(&self, data: Vec<u8>) -> impl Future<Output = ()> + Send;

    /// Sends `packet` to its address, as far as the transport supports addressing.
    ///
    /// Ignored if the transport is not started. Failures are reported through the state listener.
    fn write_packet(&self, packet: Packet) -> impl Future<Output = ()> + Send;

    /// Sets the listener for lifecycle events, replacing any previous one.
    fn set_state_listener(&self, listener: StateSender);

    /// Sets the listener for received messages, replacing any previous one.
    fn set_message_listener(&self, listener: MessageSender);

    /// Sets the runtime the loop is spawned on.
    ///
    /// Only effective before [`Transport::start`].
    fn set_executor(&self, executor: tokio::runtime::Handle);
}

#[doc(hidden)]
#[cfg(feature = "test-suites")]
pub mod test_suite {
    //! Test suite for transports.

    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::{Message, StateEvent, Transport};

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
    const QUIET_PERIOD: Duration = Duration::from_millis(200);

    /// Listens to both channels of a transport.
    #[derive(Debug)]
    pub struct Probe {
        pub states: mpsc::Receiver<StateEvent>,
        pub messages: mpsc::Receiver<Message>,
    }

    impl Probe {
        pub fn attach(transport: &impl Transport) -> Self {
            let (state_tx, states) = mpsc::channel(64);
            let (message_tx, messages) = mpsc::channel(64);
            transport.set_state_listener(state_tx);
            transport.set_message_listener(message_tx);
            Self { states, messages }
        }

        pub async fn next_state(&mut self) -> StateEvent {
            timeout(EVENT_TIMEOUT, self.states.recv())
                .await
                .expect("timed out waiting for a state event")
                .expect("state listener was dropped")
        }

        pub async fn expect_started(&mut self) {
            let event = self.next_state().await;
            assert!(
                matches!(event, StateEvent::Started),
                "expected Started, got {event:?}"
            );
        }

        pub async fn expect_closed(&mut self) {
            let event = self.next_state().await;
            assert!(
                matches!(event, StateEvent::Closed),
                "expected Closed, got {event:?}"
            );
        }

        pub async fn assert_no_state(&mut self) {
            if let Ok(Some(event)) = timeout(QUIET_PERIOD, self.states.recv()).await {
                panic!("expected no state event, got {event:?}");
            }
        }

        pub async fn next_message(&mut self) -> Message {
            timeout(EVENT_TIMEOUT, self.messages.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("message listener was dropped")
        }

        pub async fn assert_no_message(&mut self) {
            if let Ok(Some(message)) = timeout(QUIET_PERIOD, self.messages.recv()).await {
                panic!("expected no message, got {message:?}");
            }
        }

        /// Collects message payloads until `length` bytes arrived.
        pub async fn receive_bytes(&mut self, length: usize) -> Vec<u8> {
            let mut received = Vec::with_capacity(length);
            while received.len() < length {
                received.extend(self.next_message().await.data);
            }
            received
        }
    }

    pub async fn test_close_before_start(transport: impl Transport) {
        let mut probe = Probe::attach(&transport);

        transport.close();

        assert!(!transport.is_started());
        assert!(transport.is_closed());
        assert_eq!(transport.local_addr(), None);
        probe.assert_no_state().await;
    }

    pub async fn test_start_twice(transport: impl Transport) {
        let mut probe = Probe::attach(&transport);

        transport.start();
        transport.start();
        probe.expect_started().await;
        assert!(transport.is_started());
        assert!(!transport.is_closed());

        transport.start();
        probe.assert_no_state().await;

        transport.close();
        probe.expect_closed().await;
        probe.assert_no_state().await;
    }

    pub async fn test_write_after_close(transport: impl Transport) {
        let mut probe = Probe::attach(&transport);

        transport.start();
        probe.expect_started().await;
        assert!(transport.local_addr().is_some());

        transport.close();
        assert!(transport.is_closed());
        transport.close();
        probe.expect_closed().await;

        assert!(!transport.is_started());
        assert!(transport.is_closed());
        assert_eq!(transport.local_addr(), None);

        transport.write(b"after close".to_vec()).await;
        probe.assert_no_state().await;
    }

    pub async fn test_restart_after_close(transport: impl Transport) {
        let mut probe = Probe::attach(&transport);

        for _ in 0..2 {
            transport.start();
            probe.expect_started().await;
            transport.close();
            probe.expect_closed().await;
        }

        probe.assert_no_state().await;
    }

    /// Sends three payloads from a sender built for the receiver's local address and checks they arrive unchanged and
    /// in order.
    pub async fn test_round_trip<R, S>(receiver: R, make_sender: impl FnOnce(SocketAddr) -> S)
    where
        R: Transport,
        S: Transport,
    {
        let mut receiver_probe = Probe::attach(&receiver);
        receiver.start();
        receiver_probe.expect_started().await;

        let address = receiver.local_addr().expect("started receiver has a local address");
        let sender = make_sender(address);
        let mut sender_probe = Probe::attach(&sender);
        sender.start();
        sender_probe.expect_started().await;

        let payloads: [&[u8]; 3] = [b"first message", b"\x00\x01\x02\xff", b"third"];
        for payload in payloads {
            sender.write(payload.to_vec()).await;
        }

        let expected = payloads.concat();
        let received = receiver_probe.receive_bytes(expected.len()).await;
        assert_eq!(received, expected);

        sender.close();
        sender_probe.expect_closed().await;
        receiver.close();
        receiver_probe.expect_closed().await;
    }
}
