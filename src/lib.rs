//! graphite-client: a client for the Graphite plaintext protocol
//!
//! Metrics are sent as newline-delimited lines over one persistent TCP
//! connection:
//!
//! ```text
//! <prefix><path> <value> <unix-seconds>\n
//! ```
//!
//! Features:
//! - Lazy connect, connection reuse and redial after failure
//! - All-or-nothing sends: one write per call, nothing written if any metric is invalid
//! - Dial and write timeouts
//! - Path prefixing
//! - [`ProtocolServer`], a line-protocol server for verifying client output in tests
//!
//! ```no_run
//! use graphite_client::{Client, ClientConfig, Metric};
//!
//! # async fn run() -> Result<(), graphite_client::Error> {
//! let client = Client::new("localhost:2003", ClientConfig::default().with_prefix("myapp"))?;
//! client
//!     .send(&[Metric::now("requests", 12), Metric::now("latency", 0.25)])
//!     .await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metric;
pub mod protocol;
pub mod server;

pub use client::{Client, DEFAULT_PORT};
pub use config::ClientConfig;
pub use error::Error;
pub use metric::{Metric, Value};
pub use server::{ProtocolServer, ServerError};
