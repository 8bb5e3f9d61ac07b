mod bridge;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod namespace;
pub mod sandbox;
pub mod source;
pub mod state;
pub mod value;

pub use bridge::{Bridge, BridgeConfig};
pub use dispatch::{DispatchError, Dispatcher, RequestHandler};
pub use error::{BridgeError, EXIT_HOST_LOST, EXIT_OK, EXIT_STARTUP, Result};
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use monitor::{Liveness, Monitor, ProcessExit, TerminationHook};
pub use namespace::{CallError, EntryPoint, LoadError, Namespace};
pub use sandbox::{HostCaller, HostLink, SandboxConfig};
pub use source::{AllowList, ScriptSource, SourceError};
pub use state::{ConnectionState, StateError};
