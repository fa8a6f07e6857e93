//! Client error type.

use crate::metric::Metric;
use crate::protocol::ValidationError;
use std::io;
use std::time::Duration;

/// Errors returned by [`Client`](crate::Client).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server address could not be parsed
    #[error("error parsing address {address:?}: {reason}")]
    Address { address: String, reason: String },

    /// A metric in a send call is missing a required field; nothing was sent
    #[error("metrics[{index}] is invalid ({metric}): {source}")]
    Validation {
        index: usize,
        metric: Box<Metric>,
        source: ValidationError,
    },

    #[error("error connecting to {address}: {source}")]
    Connect { address: String, source: io::Error },

    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// The connection was dropped after this error
    #[error("error sending metrics: {0}")]
    Write(#[source] io::Error),

    /// The connection was dropped after this error
    #[error("timed out sending metrics after {0:?}")]
    WriteTimeout(Duration),

    #[error("error closing connection: {0}")]
    Close(#[source] io::Error),
}

impl Error {
    /// Whether this error is a dial or write timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::WriteTimeout(_))
    }
}
