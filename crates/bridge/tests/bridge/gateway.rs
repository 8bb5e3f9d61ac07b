use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use scriptbridge::{DispatchError, Gateway, GatewayConfig, GatewayError, RequestHandler};
use serde_json::json;
use tokio::{io::AsyncReadExt, net::TcpListener};

use super::common::{CallbackClient, FakeHost, READ_TIMEOUT};

/// Replies with the request text itself.
struct Mirror;

impl RequestHandler for Mirror {
    fn invoke(&self, request_json: &str) -> Result<Option<String>, DispatchError> {
        Ok(Some(request_json.to_owned()))
    }
}

fn config(port: u16) -> GatewayConfig {
    GatewayConfig {
        port,
        callback_port: Some(0),
        read_timeout: READ_TIMEOUT,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn connect_serves_callbacks_and_pings() -> Result<()> {
    let host = FakeHost::start().await?;
    let gateway = Gateway::connect(&config(host.port()), Arc::new(Mirror)).await?;

    gateway.client().ping().await.context("ping failed")?;
    let echoed = gateway.client().call("echo", Some(json!([1, 2]))).await?;
    assert_eq!(echoed, json!([1, 2]));

    let mut client = CallbackClient::connect(gateway.callback_port()).await?;
    let reply = client.invoke("raw text").await?;
    assert_eq!(reply.result, json!("raw text"));

    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn remote_errors_keep_the_connection() -> Result<()> {
    let host = FakeHost::start().await?;
    let gateway = Gateway::connect(&config(host.port()), Arc::new(Mirror)).await?;

    let err = gateway.client().call("nope", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::Remote { ref kind, .. } if kind == "unknown_method"));
    gateway.client().ping().await.context("connection dropped after remote error")?;

    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn oversized_request_keeps_the_connection() -> Result<()> {
    let host = FakeHost::start().await?;
    let gateway = Gateway::connect(&config(host.port()), Arc::new(Mirror)).await?;

    let huge = json!("x".repeat(scriptbridge_wire::MAX_FRAME_BYTES));
    let err = gateway.client().call("echo", Some(huge)).await.unwrap_err();
    assert!(matches!(err, GatewayError::Encode(_)), "{err:?}");
    assert!(!err.is_fatal());
    gateway.client().ping().await.context("connection dropped after encode error")?;

    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_is_idempotent_and_final() -> Result<()> {
    let host = FakeHost::start().await?;
    let gateway = Gateway::connect(&config(host.port()), Arc::new(Mirror)).await?;
    let port = gateway.callback_port();

    gateway.shutdown().await;
    gateway.shutdown().await;

    assert!(matches!(
        gateway.client().ping().await,
        Err(GatewayError::NotConnected)
    ));
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn dead_host_drops_the_connection() -> Result<()> {
    let host = FakeHost::start().await?;
    let gateway = Gateway::connect(&config(host.port()), Arc::new(Mirror)).await?;

    host.kill();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = gateway.client().ping().await.unwrap_err();
    assert!(first.is_fatal(), "{first:?}");
    assert!(matches!(
        gateway.client().ping().await,
        Err(GatewayError::NotConnected)
    ));

    gateway.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn silent_host_times_out_handshake() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let host_port = listener.local_addr()?.port();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0_u8; 64];
            let _ = stream.read(&mut buf).await;
            held.push(stream);
        }
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        Gateway::connect(&config(host_port), Arc::new(Mirror)),
    )
    .await
    .context("handshake never gave up")?
    .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout), "{err:?}");

    silent.abort();
    Ok(())
}
