//! Client-side session controller for a single database connection.
//!
//! A [`Connection`] sits on top of an authenticated transport and a command
//! executor. It gates every command on the connection state, turns command
//! events into results ([`Pending`] handles and [`RowStream`]s), and fails
//! everything still outstanding when the transport goes away.
//!
//! Architecture:
//! - `connection`: state machine, dispatch gate, result translation
//! - `command`: one request/response cycle and its events
//! - `executor`: executor contract and the FIFO `CommandQueue`
//! - `transport`: transport lifecycle contract
//! - `result`, `stream`, `pending`: caller-facing result handles

mod command;
mod config;
mod connection;
mod error;
mod executor;
mod pending;
mod result;
mod stream;
mod transport;
mod value;


pub use command::{Command, CommandEvent, CommandEvents, CommandId, CommandKind, CommandStatus};
pub use config::{ConnectionConfig, DEFAULT_EVENT_CAPACITY};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use error::{Result, SessionError};
pub use executor::{CommandQueue, Executor, QueueDriver};
pub use pending::Pending;
pub use result::QueryResult;
pub use stream::RowStream;
pub use transport::{ChannelTransport, Transport, TransportEvent, TransportEvents, TransportHandle};
pub use value::{Column, JsonValue, Row, Value};
