//! Session controller for one authenticated connection.
//!
//! This module provides the connection type that handles:
//! - The connection state machine (authenticated → closing → closed)
//! - The dispatch gate every command passes through
//! - Translating command events into caller-facing results
//! - Failing every outstanding command when the transport goes away

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::{Command, CommandEvent, CommandEvents, CommandId, CommandKind, TerminalHook};
use crate::config::ConnectionConfig;
use crate::error::{Result, SessionError};
use crate::executor::{CommandQueue, Executor};
use crate::pending::Pending;
use crate::result::QueryResult;
use crate::stream::RowStream;
use crate::transport::{Transport, TransportEvent, TransportEvents};
use crate::value::Value;

// ============================================================================
// State and observer events
// ============================================================================

/// Lifecycle state of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Ready to accept commands
    Authenticated,
    /// A quit is in flight
    Closing,
    /// Terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notification delivered to connection observers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A transport error, or the server going away unexpectedly
    Error(SessionError),
    /// The server acknowledged the quit
    End,
    /// The connection entered the closed state
    Close,
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the connection and its listener tasks.
struct Shared<E> {
    id: Uuid,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    executor: Mutex<E>,
    transport: Mutex<Box<dyn Transport>>,
    events: broadcast::Sender<ConnectionEvent>,
    next_command_id: AtomicU64,
}

impl<E: Executor> Shared<E> {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn notify(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The dispatch gate.
    ///
    /// Builds the command and enqueues it only while authenticated. A quit
    /// moves the connection to closing under the same lock, so nothing can
    /// be enqueued behind it.
    ///
    /// `hook` runs with the command's terminal event, before any listener
    /// sees it.
    fn dispatch(&self, kind: CommandKind, hook: Option<TerminalHook>) -> Result<CommandEvents> {
        let id: CommandId = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let (mut command, events) = Command::new(id, kind);
        if let Some(hook) = hook {
            command.on_terminal(hook);
        }

        let mut state = self.state.lock();
        let current = *state;
        if current != ConnectionState::Authenticated {
            tracing::debug!(
                connection_id = %self.id,
                command_id = id,
                kind = command.kind().name(),
                state = %current,
                "command rejected"
            );
            return Err(SessionError::Rejected(current));
        }
        if matches!(command.kind(), CommandKind::Quit) {
            *state = ConnectionState::Closing;
            tracing::debug!(connection_id = %self.id, "connection closing");
        }
        tracing::trace!(
            connection_id = %self.id,
            command_id = id,
            kind = command.kind().name(),
            "command dispatched"
        );
        self.executor.lock().enqueue(command);
        Ok(events)
    }

    /// Move to closed and release the transport.
    ///
    /// Returns the previous state, or `None` if already closed.
    fn enter_closed(&self) -> Option<ConnectionState> {
        let previous = {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return None;
            }
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };
        self.transport.lock().shutdown();
        tracing::debug!(connection_id = %self.id, from = %previous, "connection closed");
        Some(previous)
    }

    /// Fail every command the executor still holds. Returns how many.
    fn fail_outstanding(&self, error: &SessionError) -> usize {
        let drained = {
            let mut executor = self.executor.lock();
            let mut drained = Vec::new();
            while !executor.is_idle() {
                match executor.dequeue() {
                    Some(command) => drained.push(command),
                    None => break,
                }
            }
            drained
        };

        let count = drained.len();
        for mut command in drained {
            if let Err(e) = command.fail(error.clone()) {
                tracing::trace!(connection_id = %self.id, error = %e, "drained command already finished");
            }
        }
        count
    }

    fn on_transport_close(&self) {
        match self.enter_closed() {
            Some(ConnectionState::Authenticated) => {
                tracing::warn!(connection_id = %self.id, "server has gone away");
                self.notify(ConnectionEvent::Error(SessionError::ServerGone));
                self.notify(ConnectionEvent::Close);
            }
            Some(_) => self.notify(ConnectionEvent::Close),
            None => tracing::trace!(connection_id = %self.id, "transport close after connection closed"),
        }

        let failed = self.fail_outstanding(&SessionError::ConnectionLost);
        if failed > 0 {
            tracing::debug!(connection_id = %self.id, failed, "outstanding commands failed");
        }
    }

    fn query(self: &Arc<Self>, sql: &str, params: &[Value]) -> Pending<QueryResult> {
        let hook: Option<TerminalHook> = if self.config.quit_after_query {
            let shared = Arc::downgrade(self);
            Some(Box::new(move |_: &CommandEvent| quit_after_query(&shared)))
        } else {
            None
        };
        let events = match self.dispatch(CommandKind::query(sql, params), hook) {
            Ok(events) => events,
            Err(e) => return Pending::ready(Err(e)),
        };

        let (resolve, pending) = Pending::channel();
        tokio::spawn(async move {
            let _ = resolve.send(collect_rows(events).await);
        });
        pending
    }

    fn ping(&self) -> Pending<()> {
        let events = match self.dispatch(CommandKind::Ping, None) {
            Ok(events) => events,
            Err(e) => return Pending::ready(Err(e)),
        };

        let (resolve, pending) = Pending::channel();
        tokio::spawn(async move {
            let _ = resolve.send(acknowledged(events).await);
        });
        pending
    }

    /// Dispatch a quit whose outcome closes the connection.
    fn start_quit(self: &Arc<Self>) -> Result<CommandEvents> {
        let shared = Arc::downgrade(self);
        let hook: TerminalHook = Box::new(move |event: &CommandEvent| {
            if let Some(shared) = shared.upgrade() {
                shared.finish_quit(event);
            }
        });
        self.dispatch(CommandKind::Quit, Some(hook))
    }

    /// Apply the quit's outcome. Runs where the outcome is reported, so a
    /// transport close that follows it finds the connection already closed.
    fn finish_quit(&self, event: &CommandEvent) {
        match event {
            CommandEvent::Error(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "quit failed");
                if self.enter_closed().is_some() {
                    self.notify(ConnectionEvent::Close);
                }
            }
            _ => {
                if self.enter_closed().is_some() {
                    self.notify(ConnectionEvent::End);
                    self.notify(ConnectionEvent::Close);
                }
            }
        }
    }

    fn quit(self: &Arc<Self>) -> Pending<()> {
        let events = match self.start_quit() {
            Ok(events) => events,
            Err(e) => return Pending::ready(Err(e)),
        };

        let (resolve, pending) = Pending::channel();
        tokio::spawn(async move {
            let _ = resolve.send(acknowledged(events).await);
        });
        pending
    }
}

/// One-shot usage: an aggregating query ends the session, whatever its
/// outcome. The quit is dispatched before the query's caller is resolved.
fn quit_after_query<E: Executor>(shared: &Weak<Shared<E>>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    if let Err(e) = shared.start_quit() {
        tracing::trace!(connection_id = %shared.id, error = %e, "implicit quit not sent");
    }
}

/// Buffer rows until the command's terminal event.
async fn collect_rows(mut events: CommandEvents) -> Result<QueryResult> {
    let mut rows = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            CommandEvent::Row(row) => rows.push(row),
            CommandEvent::End { fields } => return Ok(QueryResult::Rows { fields, rows }),
            CommandEvent::Success(status) => {
                return Ok(QueryResult::Status {
                    affected_rows: status.affected_rows,
                    insert_id: status.insert_id,
                })
            }
            CommandEvent::Error(e) => return Err(e),
        }
    }
    Err(SessionError::ConnectionLost)
}

/// Wait for a bare acknowledgement.
async fn acknowledged(mut events: CommandEvents) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            CommandEvent::Row(_) => {}
            CommandEvent::End { .. } | CommandEvent::Success(_) => return Ok(()),
            CommandEvent::Error(e) => return Err(e),
        }
    }
    Err(SessionError::ConnectionLost)
}

/// Follow the transport's lifecycle feed for the life of the connection.
async fn watch_transport<E: Executor>(shared: Arc<Shared<E>>, mut feed: TransportEvents) {
    while let Some(event) = feed.recv().await {
        match event {
            TransportEvent::Error(e) => {
                tracing::debug!(connection_id = %shared.id, error = %e, "transport error");
                shared.notify(ConnectionEvent::Error(SessionError::Transport(e)));
            }
            TransportEvent::Close => shared.on_transport_close(),
        }
    }
    // Every sender is gone, so is the transport.
    shared.on_transport_close();
}

// ============================================================================
// Connection
// ============================================================================

/// One authenticated database session.
///
/// Construction assumes the handshake already happened upstream. Must be
/// created inside a tokio runtime: the connection spawns a task that
/// follows the transport, and one listener task per dispatched command.
pub struct Connection<E: Executor = CommandQueue> {
    shared: Arc<Shared<E>>,
    watcher: JoinHandle<()>,
}

impl<E: Executor> Connection<E> {
    /// Wrap an authenticated transport with the default configuration.
    pub fn new(executor: E, transport: impl Transport) -> Result<Self> {
        Self::with_config(executor, transport, ConnectionConfig::default())
    }

    pub fn with_config(
        executor: E,
        transport: impl Transport,
        config: ConnectionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut transport: Box<dyn Transport> = Box::new(transport);
        let feed = transport.events().ok_or_else(|| {
            SessionError::Config("transport event feed was already taken".to_string())
        })?;
        let (events, _) = broadcast::channel(config.event_capacity);

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            config,
            state: Mutex::new(ConnectionState::Authenticated),
            executor: Mutex::new(executor),
            transport: Mutex::new(transport),
            events,
            next_command_id: AtomicU64::new(1),
        });
        tracing::debug!(connection_id = %shared.id, "connection authenticated");

        let watcher = tokio::spawn(watch_transport(Arc::clone(&shared), feed));
        Ok(Self { shared, watcher })
    }

    /// Run a query and collect its whole outcome.
    ///
    /// The command is dispatched immediately. Unless
    /// [`ConnectionConfig::quit_after_query`] is off, the connection quits
    /// once the query has finished, whatever its outcome.
    pub fn query(&self, sql: &str, params: &[Value]) -> Pending<QueryResult> {
        self.shared.query(sql, params)
    }

    /// Run a query and receive its rows as they arrive.
    ///
    /// A rejected dispatch is reported as the stream's only item. The
    /// connection stays open once the stream finishes.
    pub fn query_stream(&self, sql: &str, params: &[Value]) -> RowStream {
        match self.shared.dispatch(CommandKind::query(sql, params), None) {
            Ok(events) => RowStream::open(events),
            Err(e) => RowStream::rejected(e),
        }
    }

    pub fn ping(&self) -> Pending<()> {
        self.shared.ping()
    }

    /// Ask the server to end the session.
    ///
    /// The connection is closing as soon as this returns; it is closed
    /// once the server acknowledges, or once the quit fails.
    pub fn quit(&self) -> Pending<()> {
        self.shared.quit()
    }

    /// Tear the session down without talking to the server.
    ///
    /// Every outstanding command fails with [`SessionError::ConnectionLost`].
    pub fn destroy(&self) {
        if self.shared.enter_closed().is_some() {
            self.shared.notify(ConnectionEvent::Close);
        }
        self.shared.fail_outstanding(&SessionError::ConnectionLost);
    }

    /// Subscribe to `Error`, `End` and `Close` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Send a raw command through the dispatch gate.
    #[cfg(test)]
    pub(crate) fn submit(&self, kind: CommandKind) -> Result<CommandEvents> {
        self.shared.dispatch(kind, None)
    }

    /// Run a closure against the executor.
    #[cfg(test)]
    pub(crate) fn with_executor<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.shared.executor.lock())
    }
}

impl<E: Executor> Drop for Connection<E> {
    fn drop(&mut self) {
        self.watcher.abort();
        if self.shared.state() != ConnectionState::Closed {
            tracing::debug!(connection_id = %self.shared.id, "connection dropped while open");
        }
        self.destroy();
    }
}

impl<E: Executor> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}
