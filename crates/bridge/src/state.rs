use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::watch;

/// Lifecycle of the connection to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Connected,
    Running,
    Failed,
    Stopped,
}

impl ConnectionState {
    /// `Stopped` is terminal and reachable from everywhere.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Stopped)
                | (Self::NotStarted, Self::Connected)
                | (Self::Connected, Self::Running | Self::Failed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid state transition {from} -> {to}")]
pub struct StateError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Shared, observable [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
    failed: Arc<AtomicBool>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::NotStarted);
        Self {
            tx: Arc::new(tx),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `to`, returning the previous state.
    ///
    /// # Errors
    /// Returns error if the transition is not allowed from the current state.
    pub fn transition(&self, to: ConnectionState) -> Result<ConnectionState, StateError> {
        let mut outcome = Err(StateError {
            from: ConnectionState::NotStarted,
            to,
        });
        self.tx.send_if_modified(|current| {
            let from = *current;
            if !from.can_transition_to(to) {
                outcome = Err(StateError { from, to });
                return false;
            }
            outcome = Ok(from);
            if to == ConnectionState::Failed {
                self.failed.store(true, Ordering::SeqCst);
            }
            *current = to;
            from != to
        });
        if let Ok(from) = outcome {
            if from != to {
                tracing::debug!(%from, %to, "connection state changed");
            }
        }
        outcome
    }

    /// Whether `Failed` was ever entered.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Resolve once the state equals `target`.
    pub async fn wait_for(&self, target: ConnectionState) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s == target).await;
    }
}
