use std::{io::Write, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    dispatch::{Dispatcher, RequestHandler},
    error::{BridgeError, EXIT_HOST_LOST, EXIT_OK, Result},
    gateway::{self, BlockingHostCaller, Gateway, GatewayConfig},
    monitor::{DEFAULT_INTERVAL, Monitor, ProcessExit, TerminationHook},
    namespace::Namespace,
    sandbox::{HostLink, SandboxConfig},
    source::{AllowList, ScriptSource},
    state::{ConnectionState, StateCell},
};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub gateway: GatewayConfig,
    pub monitor_interval: Duration,
    pub sandbox: SandboxConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            monitor_interval: DEFAULT_INTERVAL,
            sandbox: SandboxConfig::default(),
        }
    }
}

/// A loaded script plus its connection to the host.
pub struct Bridge {
    config: BridgeConfig,
    namespace: Arc<Namespace>,
    link: HostLink,
    state: StateCell,
    hook: Arc<dyn TerminationHook>,
    marker: Mutex<Box<dyn Write + Send>>,
    gateway: Mutex<Option<Arc<Gateway>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Resolve and evaluate the script. No channel is opened.
    ///
    /// # Errors
    /// Returns error if the source is rejected or the script fails to load.
    pub fn load(source: &ScriptSource, allow: &AllowList, config: BridgeConfig) -> Result<Self> {
        tracing::info!(source = %source.describe(), "resolving script");
        let text = source.resolve(allow)?;

        let link = HostLink::default();
        let namespace = Namespace::load(&text, &config.sandbox, &link)?;
        tracing::info!(
            entry_points = ?namespace.entry_points().collect::<Vec<_>>(),
            "script loaded"
        );

        Ok(Self {
            config,
            namespace: Arc::new(namespace),
            link,
            state: StateCell::new(),
            hook: Arc::new(ProcessExit),
            marker: Mutex::new(Box::new(std::io::stdout())),
            gateway: Mutex::new(None),
            monitor: Mutex::new(None),
        })
    }

    /// Replace the hook run after the host is lost.
    #[must_use]
    pub fn with_termination_hook(mut self, hook: Arc<dyn TerminationHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Replace where the startup marker is written. Defaults to stdout.
    #[must_use]
    pub fn with_marker_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.marker = Mutex::new(Box::new(writer));
        self
    }

    #[must_use]
    pub const fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connect to the host, announce the callback port and start the
    /// monitor. Returns the callback port.
    ///
    /// # Errors
    /// Returns error if the bridge was already started or stopped, or the
    /// handshake fails. The bridge is `Stopped` afterwards.
    pub async fn start(&self) -> Result<u16> {
        let current = self.state.get();
        if current != ConnectionState::NotStarted {
            return Err(crate::state::StateError {
                from: current,
                to: ConnectionState::Connected,
            }
            .into());
        }

        let handler: Arc<dyn RequestHandler> = Arc::new(Dispatcher::new(self.namespace.clone()));
        let gateway = match Gateway::connect(&self.config.gateway, handler).await {
            Ok(gateway) => Arc::new(gateway),
            Err(err) => {
                self.state.transition(ConnectionState::Stopped)?;
                return Err(err.into());
            }
        };
        if let Err(err) = self.state.transition(ConnectionState::Connected) {
            gateway.shutdown().await;
            return Err(err.into());
        }
        *self.gateway.lock() = Some(gateway.clone());

        let port = gateway.callback_port();
        let written = gateway::write_marker(&mut *self.marker.lock(), port);
        if let Err(err) = written {
            self.state.transition(ConnectionState::Failed)?;
            self.stop().await;
            return Err(BridgeError::Marker(err));
        }

        self.link.attach(Arc::new(BlockingHostCaller::new(
            gateway.client(),
            Handle::current(),
        )));
        self.state.transition(ConnectionState::Running)?;

        let monitor = Monitor::new(
            gateway,
            self.state.clone(),
            self.hook.clone(),
            self.config.monitor_interval,
        );
        *self.monitor.lock() = Some(monitor.spawn());
        tracing::info!(callback_port = port, "bridge running");
        Ok(port)
    }

    /// Stop the monitor and tear down the gateway. Safe to call repeatedly
    /// and from any state.
    pub async fn stop(&self) {
        let previous = self
            .state
            .transition(ConnectionState::Stopped)
            .unwrap_or(ConnectionState::Stopped);
        if previous == ConnectionState::Stopped {
            return;
        }

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        let gateway = self.gateway.lock().take();
        if let Some(gateway) = gateway {
            gateway.shutdown().await;
        }
        tracing::info!(from = %previous, "bridge stopped");
    }

    /// Resolve once the bridge is `Stopped`.
    pub async fn wait(&self) {
        self.state.wait_for(ConnectionState::Stopped).await;
    }

    /// Exit code matching how the bridge stopped.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.state.has_failed() {
            EXIT_HOST_LOST
        } else {
            EXIT_OK
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state.get())
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
