use thiserror::Error;

use crate::{
    gateway::GatewayError, namespace::LoadError, source::SourceError, state::StateError,
};

/// Process exit code after a graceful stop.
pub const EXIT_OK: i32 = 0;
/// Process exit code for configuration, load, or handshake failures.
pub const EXIT_STARTUP: i32 = 1;
/// Process exit code once the liveness monitor gives up on the host.
pub const EXIT_HOST_LOST: i32 = 3;

pub type Result<T, E = BridgeError> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The script could not be located or decoded.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The script failed to parse or raised at top level.
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Lifecycle operation attempted from the wrong state.
    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to write the startup marker")]
    Marker(#[source] std::io::Error),
}
