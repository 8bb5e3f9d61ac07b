use anyhow::{Context, Result};
use scriptbridge::{
    AllowList, Bridge, BridgeConfig, BridgeError, ConnectionState, EXIT_OK, GatewayError,
    ScriptSource,
};
use scriptbridge_wire::HostRequest;

use super::common::{FakeHost, HelloPolicy, config, inline, load, start, unused_port};

const SCRIPT: &str = "fn ok() { \"ok\" }";

#[tokio::test]
async fn start_announces_callback_port() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, port) = start(&host, SCRIPT).await?;

    assert_eq!(
        harness.marker.contents(),
        format!("JavaGateway STARTED. Callback server port: {port}\n")
    );
    assert_eq!(harness.bridge.state(), ConnectionState::Running);

    let hello = host.requests().into_iter().next().context("no handshake")?;
    assert_eq!(
        hello,
        HostRequest::Hello {
            callback_port: port,
            pid: std::process::id(),
        }
    );

    harness.bridge.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, port) = start(&host, SCRIPT).await?;

    harness.bridge.stop().await;
    harness.bridge.stop().await;
    harness.bridge.wait().await;

    assert_eq!(harness.bridge.state(), ConnectionState::Stopped);
    assert_eq!(harness.bridge.exit_code(), EXIT_OK);
    assert!(harness.hook.codes().is_empty());
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err(),
        "callback listener still accepting"
    );
    Ok(())
}

#[tokio::test]
async fn stop_before_start_is_benign() -> Result<()> {
    let harness = load(unused_port().await?, SCRIPT)?;
    harness.bridge.stop().await;
    assert_eq!(harness.bridge.state(), ConnectionState::Stopped);

    let err = harness.bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::State(_)), "{err}");
    Ok(())
}

#[tokio::test]
async fn start_twice_is_rejected() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, _) = start(&host, SCRIPT).await?;

    let err = harness.bridge.start().await.unwrap_err();
    assert!(matches!(err, BridgeError::State(_)), "{err}");
    assert_eq!(harness.bridge.state(), ConnectionState::Running);

    harness.bridge.stop().await;
    Ok(())
}

#[tokio::test]
async fn missing_host_fails_without_marker() -> Result<()> {
    let harness = load(unused_port().await?, SCRIPT)?;

    let err = harness.bridge.start().await.unwrap_err();
    assert!(
        matches!(err, BridgeError::Gateway(GatewayError::Connect { .. })),
        "{err:?}"
    );
    assert!(harness.marker.contents().is_empty());
    assert_eq!(harness.bridge.state(), ConnectionState::Stopped);
    Ok(())
}

#[tokio::test]
async fn rejected_handshake_fails_without_marker() -> Result<()> {
    let host = FakeHost::start_with(HelloPolicy::Reject).await?;
    let harness = load(host.port(), SCRIPT)?;

    let err = harness.bridge.start().await.unwrap_err();
    assert!(
        matches!(err, BridgeError::Gateway(GatewayError::Remote { .. })),
        "{err:?}"
    );
    assert!(harness.marker.contents().is_empty());
    Ok(())
}

#[tokio::test]
async fn load_errors_happen_before_any_connection() -> Result<()> {
    let host = FakeHost::start().await?;

    let err = Bridge::load(
        &inline("fn broken( {"),
        &AllowList::default(),
        config(host.port()),
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::Load(_)), "{err}");

    let err = Bridge::load(
        &ScriptSource::file("x.rhai", std::env::temp_dir()),
        &AllowList::default(),
        BridgeConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::Source(_)), "{err}");

    assert!(host.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn loads_from_allow_listed_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("job.rhai"), SCRIPT)?;
    let allow = AllowList::new([dir.path()])?;

    let bridge = Bridge::load(
        &ScriptSource::file("job.rhai", dir.path()),
        &allow,
        BridgeConfig::default(),
    )?;
    assert_eq!(bridge.namespace().entry_points().collect::<Vec<_>>(), ["ok"]);
    assert_eq!(bridge.state(), ConnectionState::NotStarted);
    Ok(())
}
