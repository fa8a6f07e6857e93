//! TCP client for the Graphite plaintext protocol.
//!
//! A [`Client`] owns at most one connection. The connection is opened lazily
//! by [`Client::send`], reused by later sends, and dropped on any connect or
//! write failure so that the next send redials. There is no retry.

use crate::config::{normalize_prefix, ClientConfig};
use crate::error::Error;
use crate::metric::Metric;
use crate::protocol;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Port used when the address does not name one
pub const DEFAULT_PORT: u16 = 2003;

/// Rough size of one encoded line, used to presize the send buffer
const LINE_SIZE_HINT: usize = 64;

/// Connection state of a client.
#[derive(Debug)]
enum ConnState {
    Disconnected,
    Connected(TcpStream),
}

impl ConnState {
    fn is_connected(&self) -> bool {
        matches!(self, ConnState::Connected(_))
    }

    /// Write the whole buffer within `limit`.
    async fn write(&mut self, buf: &[u8], limit: Duration) -> Result<(), Error> {
        let ConnState::Connected(stream) = self else {
            return Err(Error::Write(io::ErrorKind::NotConnected.into()));
        };

        match timeout(limit, stream.write_all(buf)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Write(e)),
            Err(_) => Err(Error::WriteTimeout(limit)),
        }
    }
}

/// Graphite client.
///
/// `send` and `close` are serialized on an internal lock; use one client per
/// task if sends should proceed in parallel.
#[derive(Debug)]
pub struct Client {
    host: String,
    port: u16,
    address: String,
    dial_timeout: Duration,
    write_timeout: Duration,
    prefix: String,
    conn: Mutex<ConnState>,
}

impl Client {
    /// Create a client for `address` (`host`, `host:port`, `[v6]` or `[v6]:port`).
    ///
    /// Does not connect.
    pub fn new(address: &str, config: ClientConfig) -> Result<Self, Error> {
        let (host, port) = split_host_port(address)?;

        Ok(Client {
            address: join_host_port(&host, port),
            host,
            port,
            dial_timeout: config.dial_timeout,
            write_timeout: config.write_timeout,
            prefix: normalize_prefix(&config.prefix),
            conn: Mutex::new(ConnState::Disconnected),
        })
    }

    /// Create a client with the default configuration.
    pub fn with_defaults(address: &str) -> Result<Self, Error> {
        Self::new(address, ClientConfig::default())
    }

    /// Resolved `host:port` this client dials.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Normalized path prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_connected()
    }

    /// Send metrics to the server, connecting first if necessary.
    ///
    /// All metrics are written with a single write or none are: a metric
    /// that fails validation rejects the whole call. An empty slice only
    /// ensures the connection is up.
    pub async fn send(&self, metrics: &[Metric]) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;

        if !conn.is_connected() {
            *conn = ConnState::Connected(self.dial().await?);
        }

        let buf = self.encode_all(metrics)?;
        if buf.is_empty() {
            return Ok(());
        }

        if let Err(e) = conn.write(&buf, self.write_timeout).await {
            warn!(address = %self.address, error = %e, "Dropping connection after failed send");
            *conn = ConnState::Disconnected;
            return Err(e);
        }

        trace!(count = metrics.len(), bytes = buf.len(), "Sent metrics");
        Ok(())
    }

    /// Close the connection, if any.
    ///
    /// Idempotent. The client stays usable; the next send reconnects.
    pub async fn close(&self) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;

        match std::mem::replace(&mut *conn, ConnState::Disconnected) {
            ConnState::Connected(mut stream) => {
                debug!(address = %self.address, "Closing connection");
                stream.shutdown().await.map_err(Error::Close)
            }
            ConnState::Disconnected => Ok(()),
        }
    }

    async fn dial(&self) -> Result<TcpStream, Error> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        match timeout(self.dial_timeout, connect).await {
            Ok(Ok(stream)) => {
                debug!(address = %self.address, "Connected");
                Ok(stream)
            }
            Ok(Err(source)) => {
                warn!(address = %self.address, error = %source, "Connect failed");
                Err(Error::Connect {
                    address: self.address.clone(),
                    source,
                })
            }
            Err(_) => {
                warn!(address = %self.address, timeout = ?self.dial_timeout, "Connect timed out");
                Err(Error::ConnectTimeout {
                    address: self.address.clone(),
                    timeout: self.dial_timeout,
                })
            }
        }
    }

    /// Encode every metric in order; the first invalid one aborts.
    fn encode_all(&self, metrics: &[Metric]) -> Result<BytesMut, Error> {
        let mut buf = BytesMut::with_capacity(metrics.len() * LINE_SIZE_HINT);

        for (index, metric) in metrics.iter().enumerate() {
            protocol::encode_into(metric, &self.prefix, &mut buf).map_err(|source| {
                Error::Validation {
                    index,
                    metric: Box::new(metric.clone()),
                    source,
                }
            })?;
        }

        Ok(buf)
    }
}

/// Split an address into host and port, defaulting the port.
fn split_host_port(address: &str) -> Result<(String, u16), Error> {
    let invalid = |reason: &str| Error::Address {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| invalid("missing ']'"))?;
        let after = &rest[end + 1..];
        if after.is_empty() {
            (&rest[..end], None)
        } else if let Some(port) = after.strip_prefix(':') {
            (&rest[..end], Some(port))
        } else {
            return Err(invalid("unexpected characters after ']'"));
        }
    } else {
        match address.split_once(':') {
            None => (address, None),
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            Some(_) => return Err(invalid("too many colons")),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port = match port {
        None => DEFAULT_PORT,
        Some(port) => match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(invalid("invalid port")),
        },
    };

    Ok((host.to_string(), port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
