//! The start/close state machine shared by all transports.
//!
//! A transport moves `Idle → Starting → Running → Closing → Idle`. `start` only leaves `Idle`, `close` only leaves
//! `Starting` or `Running`, everything else is a no-op. The loop task owns the socket for the whole cycle and is the
//! only one moving the phase back to `Idle`, after it released the socket.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use asocket_api::{Error, Message, MessageSender, Result, StateEvent, StateSender};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::executor::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Phase {
    Idle,
    Starting,
    Running,
    Closing,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Idle,
            1 => Phase::Starting,
            2 => Phase::Running,
            _ => Phase::Closing,
        }
    }
}

/// Per-transport lifecycle state, listeners and executor.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    kind: &'static str,
    phase: AtomicU8,
    /// Cancelled by `close` to stop the loop of the current cycle.
    cycle: Mutex<CancellationToken>,
    /// Held while a state event is sent, so a new cycle cannot report before the previous one's terminal event.
    reporting: tokio::sync::Mutex<()>,
    state_listener: Mutex<Option<StateSender>>,
    message_listener: Mutex<Option<MessageSender>>,
    executor: Executor,
}

impl Lifecycle {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            phase: AtomicU8::new(Phase::Idle as u8),
            cycle: Mutex::new(CancellationToken::new()),
            reporting: tokio::sync::Mutex::new(()),
            state_listener: Mutex::new(None),
            message_listener: Mutex::new(None),
            executor: Executor::default(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    fn transition(&self, from: Phase, to: Phase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims a new cycle, returns `None` unless the transport is fully closed.
    ///
    /// The token is replaced under the same lock `close` cancels it with, so a close right after the transition always
    /// reaches the new cycle.
    fn begin(&self) -> Option<CancellationToken> {
        let mut current = self.cycle.lock().unwrap();
        if !self.transition(Phase::Idle, Phase::Starting) {
            tracing::debug!(kind = self.kind, phase = ?self.phase(), "already started");
            return None;
        }
        let cycle = CancellationToken::new();
        *current = cycle.clone();
        Some(cycle)
    }

    /// Returns to `Idle` and reports the terminal `event` of the cycle before any event of the next one.
    async fn finish(&self, event: StateEvent) {
        let _reporting = self.reporting.lock().await;
        self.phase.store(Phase::Idle as u8, Ordering::Release);
        self.send_state(event).await;
    }

    pub(crate) fn close(&self) {
        loop {
            let phase = self.phase();
            match phase {
                Phase::Idle => {
                    tracing::debug!(kind = self.kind, "close ignored, the transport has not started");
                    return;
                }
                Phase::Closing => return,
                Phase::Starting | Phase::Running => {
                    if self.transition(phase, Phase::Closing) {
                        tracing::debug!(kind = self.kind, "closing");
                        self.cycle.lock().unwrap().cancel();
                        return;
                    }
                }
            }
        }
    }

    pub(crate) fn set_state_listener(&self, listener: StateSender) {
        *self.state_listener.lock().unwrap() = Some(listener);
    }

    pub(crate) fn set_message_listener(&self, listener: MessageSender) {
        *self.message_listener.lock().unwrap() = Some(listener);
    }

    pub(crate) fn set_executor(&self, handle: tokio::runtime::Handle) {
        if self.phase() != Phase::Idle {
            tracing::debug!(kind = self.kind, "executor ignored, the transport is already started");
            return;
        }
        self.executor.set(handle);
    }

    pub(crate) async fn emit(&self, event: StateEvent) {
        let _reporting = self.reporting.lock().await;
        self.send_state(event).await;
    }

    async fn send_state(&self, event: StateEvent) {
        let listener = self.state_listener.lock().unwrap().clone();
        if let Some(listener) = listener
            && listener.send(event).await.is_err()
        {
            tracing::trace!("state listener dropped");
        }
    }

    /// Hands a message to the listener, giving up when the cycle is closed while waiting for capacity.
    pub(crate) async fn deliver(&self, message: Message, cycle: &CancellationToken) {
        let listener = self.message_listener.lock().unwrap().clone();
        let Some(listener) = listener else {
            tracing::trace!(peer = %message.peer, length = message.data.len(), "no message listener");
            return;
        };
        tokio::select! {
            sent = listener.send(message) => {
                if sent.is_err() {
                    tracing::trace!("message listener dropped");
                }
            }
            _ = cycle.cancelled() => {}
        }
    }

    /// Moves the cycle to `Running` and reports `Started`, returns `false` if it was closed in the meantime.
    ///
    /// Drivers call this once the socket is reachable by writers and queries.
    pub(crate) async fn enter(&self) -> bool {
        if !self.transition(Phase::Starting, Phase::Running) {
            tracing::debug!("closed while starting");
            return false;
        }
        self.emit(StateEvent::Started).await;
        true
    }

    /// Logs a write that was attempted while not started.
    pub(crate) fn not_started(&self) {
        tracing::debug!(kind = self.kind, "write ignored, {}", Error::NotStarted);
    }

    pub(crate) async fn write_failed(&self, error: std::io::Error) {
        tracing::warn!(kind = self.kind, ?error, "write failed");
        self.emit(StateEvent::ExceptionRaised(Error::Io(error))).await;
    }
}

/// The per-transport parts of a start cycle.
pub(crate) trait Driver: Send + Sync + 'static {
    type Socket: Send + 'static;

    fn lifecycle(&self) -> &Lifecycle;

    fn create_socket(&self) -> impl Future<Output = Result<Self::Socket>> + Send;

    /// Publishes the socket, enters the cycle and runs the loop until `cycle` is cancelled or the socket fails.
    ///
    /// Releases the socket before returning.
    fn run(
        self: Arc<Self>,
        socket: Self::Socket,
        cycle: CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Starts a new cycle of `driver` on its executor, no-op unless it is fully closed.
pub(crate) fn start<D: Driver>(driver: &Arc<D>) {
    let lifecycle = driver.lifecycle();
    let Some(cycle) = lifecycle.begin() else {
        return;
    };
    tracing::debug!(kind = lifecycle.kind, "starting");

    let span = tracing::info_span!("transport", kind = lifecycle.kind);
    lifecycle
        .executor
        .spawn(drive(driver.clone(), cycle).instrument(span));
}

async fn drive<D: Driver>(driver: Arc<D>, cycle: CancellationToken) {
    let lifecycle = driver.lifecycle();

    let created = tokio::select! {
        created = driver.create_socket() => Some(created),
        _ = cycle.cancelled() => None,
    };

    let socket = match created {
        Some(Ok(socket)) => socket,
        Some(Err(error)) => {
            tracing::warn!(?error, "failed to create socket");
            lifecycle.finish(StateEvent::ExceptionRaised(error)).await;
            return;
        }
        None => {
            tracing::debug!("closed while creating the socket");
            lifecycle.finish(StateEvent::Closed).await;
            return;
        }
    };

    let terminal = match driver.clone().run(socket, cycle).await {
        Ok(()) => {
            tracing::info!("closed");
            StateEvent::Closed
        }
        Err(error) => {
            tracing::warn!(?error, "loop failed");
            StateEvent::ExceptionRaised(error)
        }
    };
    lifecycle.finish(terminal).await;
}
