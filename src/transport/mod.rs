/// Transport seam between the routing core and the network stack
///
/// The provider and pool only ever talk to [`Connector`] and [`Transport`];
/// the event loop that decodes replies is a separate collaborator. A tokio
/// TCP implementation is provided, tests substitute mocks.
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::topology::NodeAddress;

/// One live byte stream to a node
///
/// `set_read_only` is the single protocol-mode primitive this core owns: it
/// switches the node connection between READONLY and READWRITE mode when a
/// connection starts (or stops) serving replica reads.
#[async_trait]
pub trait Transport: Send {
    /// Queue payload bytes for transmission
    async fn write_all(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Force queued bytes onto the wire
    async fn flush(&mut self) -> io::Result<()>;

    /// Toggle replica-read mode on the connection
    async fn set_read_only(&mut self, read_only: bool) -> io::Result<()>;

    /// Tear down the byte stream
    async fn close(&mut self) -> io::Result<()>;
}

/// Factory opening transports; the sole connection-creation path
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &NodeAddress) -> io::Result<Box<dyn Transport>>;
}

/// Plain TCP connector with a connect timeout
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &NodeAddress) -> io::Result<Box<dyn Transport>> {
        debug!(%address, "connecting");
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out", address),
            )
        })??;

        // Latency matters more than throughput on a multiplexed connection
        stream.set_nodelay(true)?;

        debug!(%address, "connected");
        Ok(Box::new(TcpTransport { stream }))
    }
}

/// TCP-backed transport
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_all(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(payload).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    async fn set_read_only(&mut self, read_only: bool) -> io::Result<()> {
        let command = if read_only {
            encode_command(&["READONLY"])
        } else {
            encode_command(&["READWRITE"])
        };
        self.stream.write_all(&command).await?;
        self.stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * parts.len());
    out.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}
