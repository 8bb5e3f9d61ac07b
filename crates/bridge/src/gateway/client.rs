use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use scriptbridge_wire::{Envelope, HostRequest, Reply, read_frame, write_frame};
use serde_json::Value;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    sync::Mutex,
    time::timeout,
};

use super::GatewayError;
use crate::sandbox::HostCaller;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Request/reply client for the outbound channel.
///
/// Requests are serialised: each one holds the connection until its reply
/// arrives. A fatal error drops the connection and every later request fails
/// with [`GatewayError::NotConnected`].
pub struct HostClient {
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    read_timeout: Duration,
}

impl HostClient {
    pub(super) async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::ConnectTimeout { addr })?
            .map_err(|source| GatewayError::Connect { addr, source })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(Some(Connection {
                reader: BufReader::new(reader),
                writer,
            })),
            next_id: AtomicU64::new(1),
            read_timeout,
        })
    }

    pub(super) async fn hello(&self, callback_port: u16, pid: u32) -> Result<(), GatewayError> {
        self.request(HostRequest::Hello { callback_port, pid })
            .await
            .map(drop)
    }

    /// Liveness probe.
    ///
    /// # Errors
    /// Returns error if the host does not answer successfully in time.
    pub async fn ping(&self) -> Result<(), GatewayError> {
        self.request(HostRequest::Ping).await.map(drop)
    }

    /// Invoke `method` on the host.
    ///
    /// # Errors
    /// Returns error on transport failure or an error reply.
    pub async fn call(&self, method: &str, data: Option<Value>) -> Result<Value, GatewayError> {
        self.request(HostRequest::Call {
            method: method.to_owned(),
            data: data.unwrap_or(Value::Null),
        })
        .await
    }

    pub(super) async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(mut conn) = conn {
            if let Err(err) = conn.writer.shutdown().await {
                tracing::debug!(error = %err, "outbound shutdown failed");
            }
        }
    }

    async fn request(&self, body: HostRequest) -> Result<Value, GatewayError> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(GatewayError::NotConnected);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = self.exchange(conn, &Envelope::new(id, body)).await;
        if let Err(err) = &outcome {
            if err.is_fatal() {
                tracing::debug!(error = %err, "dropping outbound connection");
                *guard = None;
            }
        }
        outcome
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        request: &Envelope<HostRequest>,
    ) -> Result<Value, GatewayError> {
        // Encoding failures happen before any byte is written.
        write_frame(&mut conn.writer, request)
            .await
            .map_err(|err| match err {
                scriptbridge_wire::Error::Io(_) => GatewayError::Wire(err),
                err => GatewayError::Encode(err),
            })?;

        let reply: Reply = timeout(self.read_timeout, read_frame(&mut conn.reader))
            .await
            .map_err(|_| GatewayError::Timeout)??
            .ok_or(GatewayError::Closed)?;
        if reply.id != request.id {
            return Err(GatewayError::IdMismatch {
                expected: request.id,
                got: reply.id,
            });
        }
        reply
            .into_result()
            .map_err(|err| GatewayError::Remote {
                kind: err.kind,
                message: err.message,
            })
    }
}

/// Bridges script `host_call`s onto the async client.
///
/// Must only be used from threads outside the runtime, such as the blocking
/// pool that runs entry points.
pub struct BlockingHostCaller {
    client: Arc<HostClient>,
    handle: Handle,
}

impl BlockingHostCaller {
    #[must_use]
    pub const fn new(client: Arc<HostClient>, handle: Handle) -> Self {
        Self { client, handle }
    }
}

impl HostCaller for BlockingHostCaller {
    fn call_host(&self, method: &str, data: Option<Value>) -> Result<Value, String> {
        self.handle
            .block_on(self.client.call(method, data))
            .map_err(|err| err.to_string())
    }
}
