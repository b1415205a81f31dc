use thiserror::Error;

use super::phase::PhaseError;
use crate::config::ConfigError;
use crate::mqtt::mqtt_handler::SessionError;
use crate::network::link::LinkError;
use crate::network::ResolveError;
use crate::panel::PanelError;
use crate::time_sync::SyncError;

/// Fatal errors; any of them ends the process after cleanup.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Network link bring-up failed: {0}")]
    LinkFailure(#[from] LinkError),

    #[error("Broker address resolution failed: {0}")]
    ResolutionFailure(#[from] ResolveError),

    #[error("Clock synchronization failed: {0}")]
    SyncFailure(#[from] SyncError),

    #[error("Broker connection failed: {0}")]
    BrokerConnect(#[from] SessionError),

    #[error("No broker connection within {seconds} s")]
    BrokerTimeout { seconds: u64 },

    #[error("Broker session ended before the first connect completed")]
    SessionEnded,

    #[error("Panel hardware error: {0}")]
    Hardware(#[from] PanelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Phase(#[from] PhaseError),
}
