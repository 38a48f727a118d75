//! Command executor contract and the FIFO queue implementation.
//!
//! The connection only ever talks to an executor through [`Executor`]:
//! hand a command over, ask whether anything is outstanding, and pull
//! outstanding commands back out when the transport is gone.
//!
//! [`CommandQueue`] is the stock executor. It is split in two halves:
//! - `CommandQueue`: owned by the connection, implements [`Executor`]
//! - `QueueDriver`: owned by the protocol side, which reads the in-flight
//!   command and reports its rows and outcome

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::command::{Command, CommandId, CommandKind, CommandStatus};
use crate::error::{Result, SessionError};
use crate::value::{Column, Row};

/// Serializes command execution against the transport.
///
/// Implementations run at most one command at a time, in submission order.
pub trait Executor: Send + 'static {
    /// Schedule a command behind every command already outstanding.
    fn enqueue(&mut self, command: Command);

    /// True when no command is in flight or queued.
    fn is_idle(&self) -> bool;

    /// Remove the next outstanding command (the in-flight one first).
    fn dequeue(&mut self) -> Option<Command>;
}

// ============================================================================
// Command Queue
// ============================================================================

struct QueueInner {
    /// Head of the queue is the command in flight
    commands: Mutex<VecDeque<Command>>,
    /// Set once the connection side has been dropped
    closed: AtomicBool,
    ready: Notify,
}

/// Executor half of the FIFO queue.
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Create a queue and the driver that serves it.
    pub fn new() -> (Self, QueueDriver) {
        let inner = Arc::new(QueueInner {
            commands: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
        });
        let driver = QueueDriver {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, driver)
    }
}

impl Executor for CommandQueue {
    fn enqueue(&mut self, command: Command) {
        tracing::trace!(
            command_id = command.id(),
            kind = command.kind().name(),
            "command enqueued"
        );
        self.inner.commands.lock().push_back(command);
        self.inner.ready.notify_one();
    }

    fn is_idle(&self) -> bool {
        self.inner.commands.lock().is_empty()
    }

    fn dequeue(&mut self) -> Option<Command> {
        self.inner.commands.lock().pop_front()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.ready.notify_one();
    }
}

// ============================================================================
// Queue Driver
// ============================================================================

/// Protocol-side handle to a [`CommandQueue`].
///
/// Every reporting method applies to the command at the head of the queue.
/// Terminal reports (`end`, `succeed`, `fail`) remove it, promoting the
/// next queued command to in-flight.
pub struct QueueDriver {
    inner: Arc<QueueInner>,
}

impl QueueDriver {
    /// Wait until a command is in flight and describe it.
    ///
    /// Returns `None` once the executor half has been dropped and nothing
    /// is left to serve.
    pub async fn next_command(&self) -> Option<(CommandId, CommandKind)> {
        loop {
            let notified = self.inner.ready.notified();
            if let Some(current) = self.current() {
                return Some(current);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// The command in flight, if any.
    pub fn current(&self) -> Option<(CommandId, CommandKind)> {
        self.inner
            .commands
            .lock()
            .front()
            .map(|c| (c.id(), c.kind().clone()))
    }

    /// Number of outstanding commands, in flight included.
    pub fn len(&self) -> usize {
        self.inner.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_columns(&self, columns: Vec<Column>) -> Result<()> {
        self.with_current(|c| c.set_columns(columns))
    }

    pub fn push_row(&self, row: Row) -> Result<()> {
        self.with_current(|c| c.push_row(row))
    }

    pub fn end(&self) -> Result<()> {
        self.take_current(|c| c.check_can_end())?.end()
    }

    pub fn succeed(&self, status: CommandStatus) -> Result<()> {
        self.take_current(|c| c.check_open("succeed"))?.succeed(status)
    }

    pub fn fail(&self, error: SessionError) -> Result<()> {
        self.take_current(|c| c.check_open("fail"))?.fail(error)
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut Command) -> Result<R>) -> Result<R> {
        let mut commands = self.inner.commands.lock();
        let current = commands
            .front_mut()
            .ok_or_else(|| SessionError::Protocol("No command in flight".to_string()))?;
        f(current)
    }

    /// Pop the in-flight command once `check` accepts it.
    ///
    /// The terminal report runs after the queue lock is released: terminal
    /// hooks may dispatch new commands.
    fn take_current(&self, check: impl FnOnce(&Command) -> Result<()>) -> Result<Command> {
        let mut commands = self.inner.commands.lock();
        let current = commands
            .front()
            .ok_or_else(|| SessionError::Protocol("No command in flight".to_string()))?;
        check(current)?;
        let command = commands.pop_front().ok_or_else(|| {
            SessionError::Protocol("No command in flight".to_string())
        })?;
        if !commands.is_empty() {
            self.inner.ready.notify_one();
        }
        Ok(command)
    }
}
