//! Push-driven row stream for `query_stream`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::command::{CommandEvent, CommandEvents};
use crate::error::{Result, SessionError};
use crate::value::{Column, Row};

enum StreamState {
    /// Dispatch failed; the error is yielded once
    Rejected(Option<SessionError>),
    Open(CommandEvents),
    Done,
}

/// Rows of a streaming query, yielded as the server produces them.
///
/// The stream ends after the row set completes or the command reports a
/// status. A command error is yielded as a single `Err` item, after which
/// the stream ends.
pub struct RowStream {
    state: StreamState,
    fields: Option<Vec<Column>>,
    delivered: usize,
}

impl RowStream {
    pub(crate) fn open(events: CommandEvents) -> Self {
        Self {
            state: StreamState::Open(events),
            fields: None,
            delivered: 0,
        }
    }

    pub(crate) fn rejected(error: SessionError) -> Self {
        Self {
            state: StreamState::Rejected(Some(error)),
            fields: None,
            delivered: 0,
        }
    }

    /// Column descriptors, available once the row set has ended.
    pub fn fields(&self) -> Option<&[Column]> {
        self.fields.as_deref()
    }

    /// Number of rows yielded so far.
    pub fn rows_delivered(&self) -> usize {
        self.delivered
    }

    /// Whether the stream has finished.
    pub fn is_done(&self) -> bool {
        matches!(self.state, StreamState::Done)
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let events = match &mut this.state {
            StreamState::Done => return Poll::Ready(None),
            StreamState::Rejected(error) => {
                let error = error.take();
                this.state = StreamState::Done;
                return Poll::Ready(error.map(Err));
            }
            StreamState::Open(events) => events,
        };

        let item = match events.poll_recv(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(event) => event,
        };

        match item {
            Some(CommandEvent::Row(row)) => {
                this.delivered += 1;
                Poll::Ready(Some(Ok(row)))
            }
            Some(CommandEvent::End { fields }) => {
                this.fields = Some(fields);
                this.state = StreamState::Done;
                Poll::Ready(None)
            }
            Some(CommandEvent::Success(_)) => {
                this.state = StreamState::Done;
                Poll::Ready(None)
            }
            Some(CommandEvent::Error(error)) => {
                this.state = StreamState::Done;
                Poll::Ready(Some(Err(error)))
            }
            // The command was dropped without a terminal event.
            None => {
                this.state = StreamState::Done;
                Poll::Ready(Some(Err(SessionError::ConnectionLost)))
            }
        }
    }
}
