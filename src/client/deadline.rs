//! Whole-request timeout supervision.
//!
//! A [`Deadline`] is armed when a request begins waiting on the network and
//! covers connect, send and the wait for response headers. The body-read
//! scope has its own independent stall timer inside
//! [`ResponseBody`][crate::body::ResponseBody]; both share the one
//! configured duration. With no timeout configured, nothing is armed and
//! the guarded operation runs unsupervised.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Deadline {
    limit: Option<Duration>,
}

impl Deadline {
    pub(crate) fn new(limit: Option<Duration>) -> Self {
        Self { limit }
    }

    /// Run the operation, racing it against the armed timer.
    ///
    /// Whichever side finishes first wins; a late completion after the
    /// timer has fired is discarded, so exactly one outcome is observed.
    pub(crate) async fn enforce<F, T>(&self, op: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        match self.limit {
            Some(limit) => match tokio::time::timeout(limit, op).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::timed_out()),
            },
            None => op.await,
        }
    }
}
