//! Commands: one request/response cycle against the server.
//!
//! A [`Command`] is built by the connection, handed to the executor, and
//! driven by whatever speaks the wire protocol. The driver reports progress
//! through [`Command::push_row`], [`Command::end`], [`Command::succeed`] and
//! [`Command::fail`]; each call becomes a [`CommandEvent`] on the channel the
//! connection listens to.
//!
//! A command delivers zero or more rows followed by exactly one terminal
//! event. Anything reported after the terminal event is refused. The
//! connection may attach a terminal hook; it runs in the reporting context,
//! before the terminal event reaches the listener.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::value::{Column, Row, Value};

/// Identifier assigned to a command by the connection that built it.
pub type CommandId = u64;

/// What the command asks the server to do.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Query { sql: String, params: Vec<Value> },
    Ping,
    Quit,
}

impl CommandKind {
    pub fn query(sql: impl Into<String>, params: &[Value]) -> Self {
        CommandKind::Query {
            sql: sql.into(),
            params: params.to_vec(),
        }
    }

    #[inline]
    pub fn is_query(&self) -> bool {
        matches!(self, CommandKind::Query { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Query { .. } => "query",
            CommandKind::Ping => "ping",
            CommandKind::Quit => "quit",
        }
    }
}

/// Status reported by a command that finished without a row set.
///
/// Ping and quit acknowledgements carry the default (all zero).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStatus {
    pub affected_rows: u64,
    pub insert_id: u64,
}

/// Notification emitted by a command while it executes.
#[derive(Debug, Clone)]
pub enum CommandEvent {
    /// One row of the result set (query only)
    Row(Row),
    /// The row set is complete
    End { fields: Vec<Column> },
    /// Status-only completion
    Success(CommandStatus),
    Error(SessionError),
}

impl CommandEvent {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandEvent::Row(_))
    }
}

/// Receiving half of a command's event feed.
pub type CommandEvents = mpsc::UnboundedReceiver<CommandEvent>;

/// Callback run with the terminal event, before the event is delivered.
pub(crate) type TerminalHook = Box<dyn FnOnce(&CommandEvent) + Send>;

/// A unit of protocol work with a defined terminal outcome.
pub struct Command {
    id: CommandId,
    kind: CommandKind,
    /// Column descriptors, filled in by the driver before rows arrive
    columns: Vec<Column>,
    events: mpsc::UnboundedSender<CommandEvent>,
    on_terminal: Option<TerminalHook>,
    finished: bool,
}

impl Command {
    /// Build a command and the receiver its events are delivered to.
    pub fn new(id: CommandId, kind: CommandKind) -> (Self, CommandEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let command = Self {
            id,
            kind,
            columns: Vec::new(),
            events,
            on_terminal: None,
            finished: false,
        };
        (command, rx)
    }

    /// Run `hook` synchronously when the terminal event is produced.
    pub(crate) fn on_terminal(&mut self, hook: impl FnOnce(&CommandEvent) + Send + 'static) {
        self.on_terminal = Some(Box::new(hook));
    }

    #[inline]
    pub fn id(&self) -> CommandId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Whether the terminal event has been delivered.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Record the column descriptors of the row set being produced.
    pub fn set_columns(&mut self, columns: Vec<Column>) -> Result<()> {
        self.check_open("set_columns")?;
        if !self.kind.is_query() {
            return Err(self.misuse("set_columns"));
        }
        self.columns = columns;
        Ok(())
    }

    /// Deliver one row.
    pub fn push_row(&mut self, row: Row) -> Result<()> {
        self.check_open("push_row")?;
        if !self.kind.is_query() {
            return Err(self.misuse("push_row"));
        }
        self.emit(CommandEvent::Row(row));
        Ok(())
    }

    /// Finish the row set.
    pub fn end(&mut self) -> Result<()> {
        self.check_can_end()?;
        let fields = std::mem::take(&mut self.columns);
        self.finish(CommandEvent::End { fields });
        Ok(())
    }

    /// Finish with a status-only outcome.
    pub fn succeed(&mut self, status: CommandStatus) -> Result<()> {
        self.check_open("succeed")?;
        self.finish(CommandEvent::Success(status));
        Ok(())
    }

    /// Finish with an error.
    pub fn fail(&mut self, error: SessionError) -> Result<()> {
        self.check_open("fail")?;
        self.finish(CommandEvent::Error(error));
        Ok(())
    }

    /// Whether `end` would be accepted.
    pub(crate) fn check_can_end(&self) -> Result<()> {
        self.check_open("end")?;
        if !self.kind.is_query() {
            return Err(self.misuse("end"));
        }
        Ok(())
    }

    fn finish(&mut self, event: CommandEvent) {
        self.finished = true;
        if let Some(hook) = self.on_terminal.take() {
            hook(&event);
        }
        self.emit(event);
    }

    fn emit(&self, event: CommandEvent) {
        // Nobody listening means the caller gave up on the result.
        if self.events.send(event).is_err() {
            tracing::trace!(command_id = self.id, "command event dropped, listener gone");
        }
    }

    pub(crate) fn check_open(&self, op: &str) -> Result<()> {
        if self.finished {
            return Err(SessionError::Protocol(format!(
                "{} on {} command {} after its terminal event",
                op,
                self.kind.name(),
                self.id
            )));
        }
        Ok(())
    }

    fn misuse(&self, op: &str) -> SessionError {
        SessionError::Protocol(format!(
            "{} is only valid for query commands, got {}",
            op,
            self.kind.name()
        ))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("finished", &self.finished)
            .field("has_hook", &self.on_terminal.is_some())
            .finish_non_exhaustive()
    }
}
