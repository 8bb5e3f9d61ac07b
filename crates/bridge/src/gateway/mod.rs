//! Connection to the host: the outbound request channel and the inbound
//! callback listener.

mod callback;
mod client;

use std::{
    io::{self, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

pub use client::{BlockingHostCaller, HostClient};

use crate::dispatch::RequestHandler;

/// Port of the host's gateway listener.
pub const DEFAULT_PORT: u16 = 25333;

/// Text preceding the callback port on the startup marker line.
pub const MARKER_PREFIX: &str = "JavaGateway STARTED. Callback server port: ";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind callback listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to host at {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to host at {addr}")]
    ConnectTimeout { addr: SocketAddr },

    /// No reply arrived within the read timeout.
    #[error("timed out waiting for host reply")]
    Timeout,

    /// The host closed the outbound connection.
    #[error("host closed the connection")]
    Closed,

    /// The gateway was shut down, or a previous failure dropped the
    /// connection.
    #[error("gateway is not connected")]
    NotConnected,

    #[error("reply id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },

    /// The host answered with an error reply.
    #[error("host returned {kind}: {message}")]
    Remote { kind: String, message: String },

    /// The request could not be encoded. Nothing was sent.
    #[error("failed to encode request")]
    Encode(#[source] scriptbridge_wire::Error),

    #[error(transparent)]
    Wire(#[from] scriptbridge_wire::Error),
}

impl GatewayError {
    /// Whether the outbound connection is unusable after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Remote { .. } | Self::Encode(_))
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: IpAddr,
    /// Host's gateway port.
    pub port: u16,
    /// Inbound callback port. Defaults to `port + 1`; 0 picks an ephemeral
    /// port.
    pub callback_port: Option<u16>,
    pub connect_timeout: Duration,
    /// Bound on every outbound reply, including script host calls.
    pub read_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            callback_port: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(1500),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn callback_port(&self) -> u16 {
        self.callback_port.unwrap_or(match self.port {
            0 => 0,
            port => port.saturating_add(1),
        })
    }
}

/// A connected gateway.
pub struct Gateway {
    client: Arc<HostClient>,
    callback_port: u16,
    accept: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Gateway {
    /// Bind the callback listener, connect to the host and complete the
    /// handshake.
    ///
    /// # Errors
    /// Returns error if binding, connecting or the handshake fails. Nothing is
    /// left running on error.
    pub async fn connect(
        config: &GatewayConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, GatewayError> {
        let listener =
            callback::bind(SocketAddr::new(config.host, config.callback_port())).await?;
        let callback_port = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind {
                addr: SocketAddr::new(config.host, config.callback_port()),
                source,
            })?
            .port();

        let addr = SocketAddr::new(config.host, config.port);
        let client =
            HostClient::connect(addr, config.connect_timeout, config.read_timeout).await?;
        client.hello(callback_port, std::process::id()).await?;

        let accept = tokio::spawn(callback::serve(listener, handler));
        tracing::info!(%addr, callback_port, "connected to host");

        Ok(Self {
            client: Arc::new(client),
            callback_port,
            accept: Mutex::new(Some(accept)),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn callback_port(&self) -> u16 {
        self.callback_port
    }

    #[must_use]
    pub fn client(&self) -> Arc<HostClient> {
        self.client.clone()
    }

    /// Tear down both channels. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let accept = self.accept.lock().take();
        if let Some(accept) = accept {
            accept.abort();
            // Wait for the listener to be dropped.
            let _ = accept.await;
        }
        self.client.close().await;
        tracing::info!(callback_port = self.callback_port, "gateway shut down");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(accept) = self.accept.get_mut().take() {
            accept.abort();
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("callback_port", &self.callback_port)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Write the startup marker line the host waits for.
///
/// # Errors
/// Returns error if the write or flush fails.
pub fn write_marker<W: Write + ?Sized>(out: &mut W, callback_port: u16) -> io::Result<()> {
    writeln!(out, "{MARKER_PREFIX}{callback_port}")?;
    out.flush()
}
