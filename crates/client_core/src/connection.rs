use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::protocol::{ClientCommand, ServerEvent};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 256;
const TRANSITION_CAPACITY: usize = 64;

/// Lifecycle of the push channel, independent of any data flowing over it.
/// Owned solely by the supervisor; everyone else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Exponential retry schedule, doubling from `base_delay` up to `max_delay`.
/// `max_attempts` bounds consecutive failures; `None` retries forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// One open push session. `next_event` yields `None` when the transport
/// drops; `send` delivery is best-effort and only meaningful while open.
#[async_trait]
pub trait PushSession: Send {
    async fn next_event(&mut self) -> Option<ServerEvent>;
    async fn send(&mut self, command: ClientCommand) -> anyhow::Result<()>;
    async fn close(&mut self);
}

/// Factory for push sessions; the transport itself (websocket, test
/// double) lives outside the core.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self) -> anyhow::Result<Box<dyn PushSession>>;
}

struct SupervisorTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<ClientCommand>,
}

/// Drives the connection state machine: connect, retry with backoff on
/// failure or drop, explicit disconnect from any state. Transport failures
/// never reach callers; they surface only as state transitions.
pub struct ConnectionSupervisor {
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
    state_tx: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    events: broadcast::Sender<ServerEvent>,
    task: Mutex<Option<SupervisorTask>>,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<dyn PushTransport>, policy: RetryPolicy) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transport,
            policy,
            state_tx,
            transitions,
            events,
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Latest state, for polling consumers (status indicator).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Every transition in order, for consumers that must not miss one.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Starts the supervisor loop. Idempotent while a loop is running.
    pub async fn connect(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                return;
            }
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move { supervisor.run(shutdown_rx, command_rx).await });
        *task = Some(SupervisorTask {
            handle,
            shutdown: shutdown_tx,
            commands: command_tx,
        });
    }

    /// Stops the loop and cancels any pending retry timer. In-flight work
    /// elsewhere (confirming calls) is untouched.
    pub async fn disconnect(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let _ = task.handle.await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Queues a command for the open session. Returns `false` and drops the
    /// command when not connected; delivery is never assumed off-channel.
    pub async fn send_command(&self, command: ClientCommand) -> bool {
        if self.state() != ConnectionState::Connected {
            warn!("push channel not connected, dropping command");
            return false;
        }
        let task = self.task.lock().await;
        match task.as_ref() {
            Some(task) => task.commands.send(command).is_ok(),
            None => false,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    ) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                result = self.transport.open() => result,
                _ = shutdown.changed() => return,
            };

            match opened {
                Ok(mut session) => {
                    self.set_state(ConnectionState::Connected);
                    failures = 0;
                    loop {
                        tokio::select! {
                            event = session.next_event() => match event {
                                Some(event) => {
                                    let _ = self.events.send(event);
                                }
                                None => {
                                    warn!("push channel dropped");
                                    break;
                                }
                            },
                            command = commands.recv() => match command {
                                Some(command) => {
                                    if let Err(err) = session.send(command).await {
                                        warn!(error = %err, "failed to send command over push channel");
                                    }
                                }
                                None => break,
                            },
                            _ = shutdown.changed() => {
                                session.close().await;
                                return;
                            }
                        }
                    }
                    self.set_state(ConnectionState::Error);
                }
                Err(err) => {
                    warn!(error = %err, "push channel connect failed");
                    self.set_state(ConnectionState::Error);
                }
            }

            failures += 1;
            if self.policy.exhausted(failures) {
                warn!(failures, "push channel retries exhausted");
                *self.task.lock().await = None;
                return;
            }
            let delay = self.policy.delay_for(failures - 1);
            info!(failures, delay_ms = delay.as_millis() as u64, "push channel retrying");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        info!(state = ?state, "connection state changed");
        let _ = self.state_tx.send(state);
        let _ = self.transitions.send(state);
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
