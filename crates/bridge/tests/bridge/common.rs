use std::{
    io::Write,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use parking_lot::Mutex;
use scriptbridge::{
    AllowList, Bridge, BridgeConfig, GatewayConfig, ScriptSource, TerminationHook,
    source::encode_inline,
};
use scriptbridge_wire::{
    BridgeRequest, Envelope, HostRequest, Reply, read_frame, write_frame,
};
use serde_json::Value;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::{JoinHandle, JoinSet},
};

pub const MONITOR_INTERVAL: Duration = Duration::from_millis(200);
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HelloPolicy {
    #[default]
    Accept,
    Reject,
}

/// In-process stand-in for the host's gateway listener.
pub struct FakeHost {
    port: u16,
    requests: Arc<Mutex<Vec<HostRequest>>>,
    task: JoinHandle<()>,
}

impl FakeHost {
    pub async fn start() -> Result<Self> {
        Self::start_with(HelloPolicy::Accept).await
    }

    pub async fn start_with(policy: HelloPolicy) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind fake host")?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(listener, policy, Arc::clone(&requests)));
        Ok(Self {
            port,
            requests,
            task,
        })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn requests(&self) -> Vec<HostRequest> {
        self.requests.lock().clone()
    }

    pub fn pings(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, HostRequest::Ping))
            .count()
    }

    /// Drop the listener and every open connection.
    pub fn kill(&self) {
        self.task.abort();
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, policy: HelloPolicy, requests: Arc<Mutex<Vec<HostRequest>>>) {
    let mut connections = JoinSet::new();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        connections.spawn(serve_connection(stream, policy, Arc::clone(&requests)));
    }
}

async fn serve_connection(
    stream: TcpStream,
    policy: HelloPolicy,
    requests: Arc<Mutex<Vec<HostRequest>>>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    while let Ok(Some(Envelope { id, body })) =
        read_frame::<_, Envelope<HostRequest>>(&mut reader).await
    {
        requests.lock().push(body.clone());
        let reply = match body {
            HostRequest::Hello { .. } if policy == HelloPolicy::Reject => {
                Reply::error(id, "rejected", "unexpected bridge")
            }
            HostRequest::Hello { .. } | HostRequest::Ping => Reply::ok(id, Value::Null),
            HostRequest::Call { method, data } => match method.as_str() {
                "echo" => Reply::ok(id, data),
                other => Reply::error(id, "unknown_method", format!("no host method {other}")),
            },
        };
        if write_frame(&mut writer, &reply).await.is_err() {
            break;
        }
    }
}

/// Host side of the callback channel.
pub struct CallbackClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl CallbackClient {
    pub async fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to connect to callback port {port}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 0,
        })
    }

    pub async fn invoke(&mut self, request: &str) -> Result<Reply> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = Envelope::new(
            id,
            BridgeRequest::Invoke {
                request: request.to_owned(),
            },
        );
        write_frame(&mut self.writer, &frame)
            .await
            .context("failed to send invoke")?;
        let reply = self.read_reply().await?;
        ensure!(reply.id == id, "reply id {} for request {id}", reply.id);
        Ok(reply)
    }

    pub async fn send_raw(&mut self, line: &str) -> Result<Reply> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.reader))
            .await
            .context("timed out waiting for reply")?
            .context("failed to read reply")?
            .context("bridge closed the callback connection")
    }
}

/// Captures the startup marker.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHook(Mutex<Vec<i32>>);

impl RecordingHook {
    pub fn codes(&self) -> Vec<i32> {
        self.0.lock().clone()
    }
}

impl TerminationHook for RecordingHook {
    fn terminate(&self, code: i32) {
        self.0.lock().push(code);
    }
}

pub fn config(host_port: u16) -> BridgeConfig {
    BridgeConfig {
        gateway: GatewayConfig {
            port: host_port,
            callback_port: Some(0),
            read_timeout: READ_TIMEOUT,
            ..GatewayConfig::default()
        },
        monitor_interval: MONITOR_INTERVAL,
        ..BridgeConfig::default()
    }
}

pub fn inline(script: &str) -> ScriptSource {
    ScriptSource::inline(encode_inline(script))
}

pub struct Harness {
    pub bridge: Bridge,
    pub marker: SharedBuf,
    pub hook: Arc<RecordingHook>,
}

pub fn load(host_port: u16, script: &str) -> Result<Harness> {
    let marker = SharedBuf::default();
    let hook = Arc::new(RecordingHook::default());
    let bridge = Bridge::load(&inline(script), &AllowList::default(), config(host_port))
        .context("failed to load script")?
        .with_marker_writer(marker.clone())
        .with_termination_hook(hook.clone());
    Ok(Harness {
        bridge,
        marker,
        hook,
    })
}

/// Load `script` and connect it to `host`. Returns the callback port.
pub async fn start(host: &FakeHost, script: &str) -> Result<(Harness, u16)> {
    let harness = load(host.port(), script)?;
    let port = harness
        .bridge
        .start()
        .await
        .context("failed to start bridge")?;
    Ok((harness, port))
}

/// A loopback port with nothing listening on it.
pub async fn unused_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}
