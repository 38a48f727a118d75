//! Transport lifecycle contract.
//!
//! The connection never reads or writes bytes itself; it only needs to
//! know when the underlying socket reports an error or goes away, and to
//! shut it down once the session is finished.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Lifecycle notification raised by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A non-fatal error surfaced by the socket
    Error(Arc<io::Error>),
    /// The connection is gone for good
    Close,
}

/// Receiving half of a transport's event feed.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Duplex connection the session runs on.
pub trait Transport: Send + 'static {
    /// Take the lifecycle event feed. Yields `Some` exactly once.
    ///
    /// When every sender of the feed is dropped the connection treats the
    /// transport as closed.
    fn events(&mut self) -> Option<TransportEvents>;

    /// Release the underlying socket. Called once the session is over.
    fn shutdown(&mut self);
}

/// Transport backed by an in-process channel.
///
/// The socket-owning side keeps the [`TransportHandle`] and reports through it.
pub struct ChannelTransport {
    events: Option<TransportEvents>,
    shut_down: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new() -> (Self, TransportHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shut_down = Arc::new(AtomicBool::new(false));
        let transport = Self {
            events: Some(rx),
            shut_down: Arc::clone(&shut_down),
        };
        (transport, TransportHandle { tx, shut_down })
    }
}

impl Transport for ChannelTransport {
    fn events(&mut self) -> Option<TransportEvents> {
        self.events.take()
    }

    fn shutdown(&mut self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

/// Reporting side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<TransportEvent>,
    shut_down: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn error(&self, error: io::Error) {
        let _ = self.tx.send(TransportEvent::Error(Arc::new(error)));
    }

    pub fn close(&self) {
        let _ = self.tx.send(TransportEvent::Close);
    }

    /// Whether the connection has asked for the socket to be released.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
