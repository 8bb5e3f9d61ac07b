//! Background liveness probing of the host.

use std::{sync::Arc, time::Duration};

use scriptbridge_trace::consts::TRACE_TARGET_MONITOR;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    error::EXIT_HOST_LOST,
    gateway::{Gateway, GatewayError},
    state::{ConnectionState, StateCell},
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Something the monitor can probe and tear down.
#[async_trait::async_trait]
pub trait Liveness: Send + Sync + 'static {
    async fn probe(&self) -> Result<(), GatewayError>;
    async fn shutdown(&self);
}

#[async_trait::async_trait]
impl Liveness for Gateway {
    async fn probe(&self) -> Result<(), GatewayError> {
        self.client().ping().await
    }

    async fn shutdown(&self) {
        Self::shutdown(self).await;
    }
}

/// Invoked once the host is lost and the bridge has stopped.
pub trait TerminationHook: Send + Sync + 'static {
    fn terminate(&self, code: i32);
}

/// Exits the process immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExit;

impl TerminationHook for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

pub struct Monitor {
    target: Arc<dyn Liveness>,
    state: StateCell,
    hook: Arc<dyn TerminationHook>,
    interval: Duration,
}

impl Monitor {
    #[must_use]
    pub fn new(
        target: Arc<dyn Liveness>,
        state: StateCell,
        hook: Arc<dyn TerminationHook>,
        interval: Duration,
    ) -> Self {
        Self {
            target,
            state,
            hook,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probe every interval while the bridge is running.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(target: TRACE_TARGET_MONITOR, interval = ?self.interval, "monitor started");

        loop {
            ticker.tick().await;
            if self.state.get() != ConnectionState::Running {
                break;
            }
            match self.target.probe().await {
                Ok(()) => tracing::trace!(target: TRACE_TARGET_MONITOR, "host is alive"),
                Err(err) => {
                    self.host_lost(&err).await;
                    return;
                }
            }
        }
        tracing::debug!(target: TRACE_TARGET_MONITOR, "monitor exiting");
    }

    async fn host_lost(&self, err: &GatewayError) {
        // An explicit stop may already own the teardown.
        if let Err(err) = self.state.transition(ConnectionState::Failed) {
            tracing::debug!(target: TRACE_TARGET_MONITOR, error = %err, "probe failed after stop");
            return;
        }
        tracing::error!(
            target: TRACE_TARGET_MONITOR,
            error = %err,
            "lost connection to host, terminating"
        );
        self.target.shutdown().await;
        if let Err(err) = self.state.transition(ConnectionState::Stopped) {
            tracing::warn!(target: TRACE_TARGET_MONITOR, error = %err, "unexpected state");
        }
        self.hook.terminate(EXIT_HOST_LOST);
    }
}
