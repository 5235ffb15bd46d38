//! Server-pushed change event streams.

use futures::stream::{self, Stream};

use kvstore_proto::{ChangeEvent, ResponsePayload, Status};

use crate::connection::Connection;
use crate::error::Error;

/// An open subscription.
///
/// Owns a dedicated connection. Dropping the stream closes the connection,
/// which the server treats as the subscriber going away.
#[derive(Debug)]
pub struct EventStream {
    connection: Connection,
    subscription_id: u64,
    prefix: String,
    finished: bool,
}

impl EventStream {
    pub(crate) fn new(mut connection: Connection, subscription_id: u64, prefix: String) -> Self {
        connection.start_streaming();
        Self {
            connection,
            subscription_id,
            prefix,
            finished: false,
        }
    }

    /// Identifier the server assigned to this subscription.
    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Prefix this stream matches.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the next change event.
    ///
    /// Returns `Ok(None)` once the server has closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<ChangeEvent>, Error> {
        if self.finished {
            return Ok(None);
        }

        let response = match self.connection.read_response().await {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.finish();
                return Ok(None);
            }
            Err(e) => {
                self.finish();
                return Err(e);
            }
        };

        if let Status::Error { code, message } = response.status {
            self.finish();
            return Err(Error::Server { code, message });
        }

        match response.payload {
            ResponsePayload::Event(event) => Ok(Some(event)),
            _ => Err(Error::UnexpectedResponse("change event")),
        }
    }

    /// Convert into a [`Stream`] of events that ends when the server closes
    /// the subscription or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ChangeEvent, Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut events = state?;
            match events.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(events))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Close the stream and its connection.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.connection.close();
            tracing::debug!(
                subscription_id = self.subscription_id,
                prefix = %self.prefix,
                "event stream closed"
            );
        }
    }
}
