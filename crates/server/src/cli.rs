use std::{path::PathBuf, time::Duration};

use anyhow::bail;
use clap::{ArgGroup, Parser};
use scriptbridge::{
    BridgeConfig, EXIT_OK, EXIT_STARTUP, GatewayConfig, SandboxConfig, ScriptSource,
    gateway::DEFAULT_PORT,
};

/// Runs a script on behalf of a host process and serves its entry points
/// over the callback channel.
#[derive(Debug, Parser)]
#[command(name = "scriptbridge", version)]
#[command(group(ArgGroup::new("script").required(true).args(["script_name", "script_b64"])))]
pub struct Args {
    /// Script file name, resolved inside `--script-dir`.
    #[arg(long, requires = "script_dir")]
    pub script_name: Option<String>,

    /// Allow-listed directory containing the script.
    #[arg(long, requires = "script_name", conflicts_with = "script_b64")]
    pub script_dir: Option<PathBuf>,

    /// Base64-encoded script text.
    #[arg(long)]
    pub script_b64: Option<String>,

    /// Host gateway port.
    #[arg(long, env = "SCRIPTBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Callback port. Defaults to `port + 1`; 0 picks any free port.
    #[arg(long, env = "SCRIPTBRIDGE_CALLBACK_PORT")]
    pub callback_port: Option<u16>,

    #[arg(long, env = "SCRIPTBRIDGE_LOG_FILE", default_value = "logs/scriptbridge.log")]
    pub log_file: PathBuf,

    /// Liveness probe interval in milliseconds.
    #[arg(long, env = "SCRIPTBRIDGE_MONITOR_INTERVAL_MS", default_value_t = 2000)]
    pub monitor_interval_ms: u64,

    /// Outbound reply timeout in milliseconds.
    #[arg(long, env = "SCRIPTBRIDGE_READ_TIMEOUT_MS", default_value_t = 1500)]
    pub read_timeout_ms: u64,

    /// Script operation budget per call. 0 is unlimited.
    #[arg(long, env = "SCRIPTBRIDGE_MAX_OPERATIONS", default_value_t = 0)]
    pub max_operations: u64,
}

impl Args {
    /// Parse the command line, exiting with the startup code on error.
    pub fn parse_or_exit() -> Self {
        match Self::try_parse() {
            Ok(args) => args,
            Err(err) => {
                let _ = err.print();
                std::process::exit(if err.use_stderr() {
                    EXIT_STARTUP
                } else {
                    EXIT_OK
                });
            }
        }
    }

    pub fn source(&self) -> anyhow::Result<ScriptSource> {
        match (&self.script_name, &self.script_dir, &self.script_b64) {
            (Some(name), Some(dir), None) => Ok(ScriptSource::file(name.clone(), dir.clone())),
            (None, None, Some(payload)) => Ok(ScriptSource::inline(payload.clone())),
            _ => bail!("expected either --script-name with --script-dir, or --script-b64"),
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            gateway: GatewayConfig {
                port: self.port,
                callback_port: self.callback_port,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                ..GatewayConfig::default()
            },
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            sandbox: SandboxConfig {
                max_operations: self.max_operations,
                ..SandboxConfig::default()
            },
        }
    }
}
