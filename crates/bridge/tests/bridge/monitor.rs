use anyhow::{Context, Result};
use scriptbridge::{ConnectionState, EXIT_HOST_LOST};

use serde_json::json;

use super::common::{CallbackClient, FakeHost, MONITOR_INTERVAL, READ_TIMEOUT, start};

const SCRIPT: &str = "fn ok() { \"ok\" }";

#[tokio::test]
async fn healthy_host_is_probed_every_interval() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, _) = start(&host, SCRIPT).await?;

    tokio::time::sleep(MONITOR_INTERVAL * 3 + MONITOR_INTERVAL / 2).await;

    assert_eq!(harness.bridge.state(), ConnectionState::Running);
    assert!(host.pings() >= 2, "only {} pings", host.pings());
    assert!(harness.hook.codes().is_empty());

    harness.bridge.stop().await;
    Ok(())
}

#[tokio::test]
async fn lost_host_stops_bridge_and_terminates() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, port) = start(&host, SCRIPT).await?;

    host.kill();
    tokio::time::timeout(MONITOR_INTERVAL + READ_TIMEOUT, harness.bridge.wait())
        .await
        .context("bridge did not stop within one interval")?;

    assert_eq!(harness.bridge.state(), ConnectionState::Stopped);
    assert_eq!(harness.hook.codes(), [EXIT_HOST_LOST]);
    assert_eq!(harness.bridge.exit_code(), EXIT_HOST_LOST);
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err(),
        "callback listener still accepting"
    );

    harness.bridge.stop().await;
    assert_eq!(harness.hook.codes(), [EXIT_HOST_LOST]);
    Ok(())
}

#[tokio::test]
async fn explicit_stop_prevents_termination() -> Result<()> {
    let host = FakeHost::start().await?;
    let (harness, _) = start(&host, SCRIPT).await?;

    harness.bridge.stop().await;
    host.kill();
    tokio::time::sleep(MONITOR_INTERVAL * 2).await;

    assert_eq!(harness.bridge.state(), ConnectionState::Stopped);
    assert!(harness.hook.codes().is_empty());
    assert_eq!(harness.bridge.exit_code(), scriptbridge::EXIT_OK);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_host_call_keeps_the_host_connection() -> Result<()> {
    const OVERSIZED: &str = r#"
        fn send_huge() {
            let s = "x";
            s.pad(17000000, 'x');
            try { host_call("echo", s); "sent" } catch (e) { "refused" }
        }
        fn lookup(key) { host_call("echo", key) }
    "#;

    let host = FakeHost::start().await?;
    let (harness, port) = start(&host, OVERSIZED).await?;
    let mut client = CallbackClient::connect(port).await?;

    let reply = client.invoke(r#"{"method":"send_huge"}"#).await?;
    assert_eq!(reply.error, None);
    assert_eq!(reply.result, json!("refused"));

    tokio::time::sleep(MONITOR_INTERVAL * 2 + READ_TIMEOUT).await;
    assert_eq!(harness.bridge.state(), ConnectionState::Running);
    assert!(harness.hook.codes().is_empty());

    let reply = client.invoke(r#"{"method":"lookup","data":"k"}"#).await?;
    assert_eq!(reply.error, None);
    assert_eq!(reply.result, json!("k"));

    harness.bridge.stop().await;
    Ok(())
}
