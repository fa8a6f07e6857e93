//! Line-protocol server for verifying client output.
//!
//! Stands in for a Graphite endpoint: accepts connections, decodes every
//! line, and records the resulting metrics and any errors in two
//! append-only logs that tests can inspect. Errors are never raised to the
//! caller since many connections are handled concurrently.

use crate::metric::Metric;
use crate::protocol::{self, DecodeError};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Initial capacity of the per-connection line buffer
const LINE_CAPACITY: usize = 256;

/// Interval between checks in the `wait_for_*` helpers
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause after a failed accept, so errors like EMFILE do not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error recorded by the server
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// A malformed line; the connection was terminated
    #[error("{peer}: {source}")]
    Decode { peer: SocketAddr, source: DecodeError },

    #[error("{peer}: error reading line: {message}")]
    Read {
        peer: SocketAddr,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("error accepting connection: {message}")]
    Accept { kind: io::ErrorKind, message: String },
}

/// Received metrics and errors, each behind its own lock.
#[derive(Debug, Default)]
struct Log {
    metrics: Mutex<Vec<Metric>>,
    errors: Mutex<Vec<ServerError>>,
}

impl Log {
    fn push_metric(&self, metric: Metric) {
        lock(&self.metrics).push(metric);
    }

    fn push_error(&self, err: ServerError) {
        lock(&self.errors).push(err);
    }
}

/// A poisoned log is still a valid append-only log.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test server for the Graphite plaintext protocol.
#[derive(Debug)]
pub struct ProtocolServer {
    local_addr: SocketAddr,
    log: Arc<Log>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolServer {
    /// Bind to `addr` and start accepting connections on the current runtime.
    ///
    /// Port 0 picks an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Protocol server listening");

        let log = Arc::new(Log::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&log), shutdown_rx));

        Ok(ProtocolServer {
            local_addr,
            log,
            shutdown,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the metrics received so far, in arrival order.
    pub fn metrics(&self) -> Vec<Metric> {
        lock(&self.log.metrics).clone()
    }

    /// Snapshot of the errors recorded so far.
    pub fn errors(&self) -> Vec<ServerError> {
        lock(&self.log.errors).clone()
    }

    pub fn has_errors(&self) -> bool {
        !lock(&self.log.errors).is_empty()
    }

    /// Wait until at least `count` metrics were received or `timeout` elapses,
    /// then return a snapshot.
    pub async fn wait_for_metrics(&self, count: usize, timeout: Duration) -> Vec<Metric> {
        self.wait_until(timeout, || lock(&self.log.metrics).len() >= count)
            .await;
        self.metrics()
    }

    /// Wait until at least `count` errors were recorded or `timeout` elapses,
    /// then return a snapshot.
    pub async fn wait_for_errors(&self, count: usize, timeout: Duration) -> Vec<ServerError> {
        self.wait_until(timeout, || lock(&self.log.errors).len() >= count)
            .await;
        self.errors()
    }

    async fn wait_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !done() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Close the listener and wait for the accept loop to exit.
    ///
    /// Idempotent. Connections already accepted keep running until their
    /// peers disconnect.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let task = lock(&self.accept_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop panicked");
            }
        }
    }
}

/// Accept connections until shutdown is signalled or the server is dropped.
async fn accept_loop(listener: TcpListener, log: Arc<Log>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Listener closed");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");

                        let log = Arc::clone(&log);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, &log).await {
                                warn!(error = %e, "Connection error");
                                log.push_error(e);
                            }
                        });
                    }
                    Err(e) => record_accept_error(&log, e).await,
                }
            }
        }
    }
}

async fn record_accept_error(log: &Log, e: io::Error) {
    error!(error = %e, "Failed to accept connection");
    log.push_error(ServerError::Accept {
        kind: e.kind(),
        message: e.to_string(),
    });
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Read and decode lines until the peer closes the connection.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, log: &Log) -> Result<(), ServerError> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(LINE_CAPACITY);

    loop {
        line.clear();

        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| ServerError::Read {
                peer,
                kind: e.kind(),
                message: e.to_string(),
            })?;
        if n == 0 {
            trace!(peer = %peer, "Connection closed by client");
            return Ok(());
        }

        // EOF in the middle of a line
        let Some(content) = line.strip_suffix(b"\n") else {
            trace!(peer = %peer, bytes = n, "Discarding partial line");
            return Ok(());
        };

        let metric =
            protocol::decode_line(content).map_err(|source| ServerError::Decode { peer, source })?;
        trace!(peer = %peer, path = %metric.path, "Received metric");
        log.push_metric(metric);
    }
}
