//! A synchronous façade over any transport.

use std::sync::Arc;
use std::time::Duration;

use asocket_api::{Message, Packet, StateEvent, Transport};
use tokio::sync::mpsc;

/// How long `close` keeps forwarding events while waiting for the transport to report its end.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Operations sent to the actor.
#[derive(Debug)]
enum Command {
    Start,
    Close,
    Write(Vec<u8>),
    WritePacket(Packet),
}

/// Everything a transport reports, in the order the worker observed it.
#[derive(Debug)]
pub enum Event {
    /// A lifecycle change or failure.
    State(StateEvent),
    /// A received message.
    Message(Message),
}

/// Owns a transport in a background task and forwards calls to it from any thread.
///
/// All methods only enqueue a command and return immediately, commands are applied in order. State events and
/// messages are merged into the [`Event`] receiver returned by [`Dispatcher::new`].
///
/// `close` closes the transport, forwards its remaining events and then stops the worker, later commands are dropped.
/// Dropping the `Dispatcher` closes the transport without waiting.
#[derive(Debug)]
pub struct Dispatcher<T> {
    transport: Arc<T>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl<T: Transport> Dispatcher<T> {
    /// Takes over `transport`, replacing its listeners.
    ///
    /// Can be called outside of a runtime, the worker then runs on the shared background runtime.
    pub fn new(transport: T) -> (Self, mpsc::Receiver<Event>) {
        let transport = Arc::new(transport);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(crate::ARBITRARY_CHANNEL_BUFFER);

        let (state_tx, state_rx) = mpsc::channel(crate::ARBITRARY_CHANNEL_BUFFER);
        let (message_tx, message_rx) = mpsc::channel(crate::ARBITRARY_CHANNEL_BUFFER);
        transport.set_state_listener(state_tx);
        transport.set_message_listener(message_tx);

        let inner = Inner {
            transport: transport.clone(),
            command_rx,
            state_rx,
            message_rx,
            event_tx,
        };
        crate::executor::current_or_background().spawn(inner.run());

        (
            Self {
                transport,
                command_tx,
            },
            event_rx,
        )
    }

    /// Returns the transport for queries.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            tracing::debug!("command ignored, the dispatcher is closed");
        }
    }

    /// Starts the transport.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// Closes the transport and stops the worker.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Writes `data` to the default destination of the transport.
    pub fn write(&self, data: impl Into<Vec<u8>>) {
        self.send(Command::Write(data.into()));
    }

    /// Writes `packet` to its address.
    pub fn write_packet(&self, packet: Packet) {
        self.send(Command::WritePacket(packet));
    }

    /// See [`Transport::is_started`].
    pub fn is_started(&self) -> bool {
        self.transport.is_started()
    }

    /// See [`Transport::is_connected`].
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// See [`Transport::is_closed`].
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

/// The worker task, the only place calling into the transport besides queries.
struct Inner<T> {
    transport: Arc<T>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    state_rx: mpsc::Receiver<StateEvent>,
    message_rx: mpsc::Receiver<Message>,
    event_tx: mpsc::Sender<Event>,
}

impl<T: Transport> Inner<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("dispatcher dropped, closing transport");
                        self.transport.close();
                        return;
                    };
                    if !self.apply_command(command).await {
                        break;
                    }
                }
                Some(event) = self.state_rx.recv() => self.forward(Event::State(event)).await,
                Some(message) = self.message_rx.recv() => self.forward(Event::Message(message)).await,
            }
        }

        self.drain().await;
    }

    /// Returns `false` once the worker should stop.
    async fn apply_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.transport.start(),
            Command::Close => {
                self.transport.close();
                return false;
            }
            Command::Write(data) => self.transport.write(data).await,
            Command::WritePacket(packet) => self.transport.write_packet(packet).await,
        }
        true
    }

    async fn forward(&self, event: Event) {
        if self.event_tx.send(event).await.is_err() {
            tracing::trace!("event receiver dropped");
        }
    }

    /// Forwards events until the transport reported the end of its cycle, or for [`CLOSE_GRACE`] when it is quiet.
    async fn drain(&mut self) {
        let deadline = tokio::time::sleep(CLOSE_GRACE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                Some(event) = self.state_rx.recv() => {
                    let terminal = event.is_terminal();
                    self.forward(Event::State(event)).await;
                    if terminal {
                        return;
                    }
                }
                Some(message) = self.message_rx.recv() => self.forward(Event::Message(message)).await,
                _ = &mut deadline => {
                    tracing::debug!("transport reported no end of cycle");
                    return;
                }
            }
        }
    }
}
