use std::{net::SocketAddr, sync::Arc, time::Duration};

use scriptbridge_wire::{
    BridgeRequest, Envelope, Error as WireError, Reply, read_frame, write_frame,
};
use serde_json::Value;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    task::JoinSet,
};

use super::GatewayError;
use crate::dispatch::RequestHandler;

pub(super) async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })
}

/// Accept callback connections until aborted. Aborting drops the
/// [`JoinSet`], which aborts every connection task with it.
pub(super) async fn serve(listener: TcpListener, handler: Arc<dyn RequestHandler>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "callback connection accepted");
                    connections.spawn(serve_connection(stream, peer, handler.clone()));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept callback connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, handler: Arc<dyn RequestHandler>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let reply = match read_frame::<_, Envelope<BridgeRequest>>(&mut reader).await {
            Ok(Some(Envelope {
                id,
                body: BridgeRequest::Invoke { request },
            })) => invoke(id, request, handler.clone()).await,
            Ok(None) => break,
            Err(WireError::Json(err)) => {
                tracing::warn!(%peer, error = %err, "malformed callback frame");
                Reply::error(0, "decode", err.to_string())
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "callback connection failed");
                break;
            }
        };

        if let Err(err) = send_reply(&mut writer, &reply).await {
            tracing::debug!(%peer, error = %err, "failed to write callback reply");
            break;
        }
    }
    tracing::debug!(%peer, "callback connection closed");
}

/// Write `reply`, replacing a result too large for one frame with a
/// `serialize` error.
async fn send_reply(writer: &mut OwnedWriteHalf, reply: &Reply) -> Result<(), WireError> {
    let id = reply.id;
    match write_frame(writer, reply).await {
        Err(WireError::FrameTooLarge { len, max }) => {
            tracing::warn!(id, len, max, "reply exceeds the frame limit");
            let reply = Reply::error(
                id,
                "serialize",
                format!("result of {len} bytes exceeds the {max} byte frame limit"),
            );
            write_frame(writer, &reply).await
        }
        outcome => outcome,
    }
}

async fn invoke(id: u64, request: String, handler: Arc<dyn RequestHandler>) -> Reply {
    match tokio::task::spawn_blocking(move || handler.invoke(&request)).await {
        Ok(Ok(result)) => Reply::ok(id, result.map_or(Value::Null, Value::String)),
        Ok(Err(err)) => {
            tracing::warn!(id, kind = err.kind(), error = %err, "invoke failed");
            Reply::error(id, err.kind(), err.to_string())
        }
        Err(err) => {
            tracing::error!(id, error = %err, "entry point panicked");
            Reply::error(id, "invocation", format!("entry point panicked: {err}"))
        }
    }
}
