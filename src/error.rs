//! Error types for the session controller.
//!
//! Errors are `Clone` so a single cause can be fanned out to every
//! outstanding command and to every connection observer.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// The dispatch gate refused a command.
    #[error("Command rejected: connection is {0}, not authenticated")]
    Rejected(ConnectionState),

    /// The server answered the command with an error packet.
    #[error("Server error {code}: {message}")]
    Server {
        code: u16,
        sql_state: Option<String>,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport closed while the command was still outstanding.
    #[error("Connection lost: the server closed the connection")]
    ConnectionLost,

    /// The transport closed while the session was still authenticated.
    #[error("Server has gone away")]
    ServerGone,

    #[error("Transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Build a server error without an SQLSTATE.
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        SessionError::Server {
            code,
            sql_state: None,
            message: message.into(),
        }
    }

    /// True for errors caused by losing the underlying transport.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionError::ConnectionLost | SessionError::ServerGone | SessionError::Transport(_)
        )
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Transport(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
