//! Connection configuration.

use crate::error::{Result, SessionError};

/// Default capacity of the observer event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Session controller configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Quit the connection after every aggregating query (default: true).
    ///
    /// Turn this off when the connection is reused for several queries.
    pub quit_after_query: bool,
    /// Number of observer events buffered per subscriber (default: 32)
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            quit_after_query: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether aggregating queries close the connection afterwards.
    pub fn quit_after_query(mut self, enabled: bool) -> Self {
        self.quit_after_query = enabled;
        self
    }

    /// Set the observer event buffer capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(SessionError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
