use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Where the device is in its bring-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Undefined,
    ConnectingLink,
    SynchronizingClock,
    ConnectingBroker,
    Connected,
    Interrupted,
}

impl ConnectionPhase {
    /// Bring-up only moves forward; afterwards the phase toggles between
    /// `Connected` and `Interrupted`.
    pub fn can_advance_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Undefined, ConnectingLink)
                | (ConnectingLink, SynchronizingClock)
                | (SynchronizingClock, ConnectingBroker)
                | (ConnectingBroker, Connected)
                | (Connected, Interrupted)
                | (Interrupted, Connected)
        )
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionPhase,
        to: ConnectionPhase,
    },
}

/// Writer side of the shared phase. Readers hold a `watch::Receiver`.
#[derive(Debug, Clone)]
pub struct PhaseHandle {
    tx: Arc<watch::Sender<ConnectionPhase>>,
}

impl Default for PhaseHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionPhase::Undefined);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionPhase> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectionPhase {
        *self.tx.borrow()
    }

    /// Moves to `next`. Re-entering the current phase is a no-op.
    pub fn advance(&self, next: ConnectionPhase) -> Result<(), PhaseError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_advance_to(next) {
                result = Err(PhaseError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                return false;
            }
            debug!("Connection phase {} -> {}", current, next);
            *current = next;
            true
        });
        result
    }
}
