//! Unified error handling for the client runtime.

use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Engine error: {0}")]
    Engine(#[from] worthy_engine::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync service has stopped")]
    ServiceStopped,

    /// A pass shared by several callers failed; each gets the message.
    #[error("Sync pass failed: {0}")]
    PassFailed(String),
}

impl Error {
    /// Whether a retry later could succeed without anyone changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Gateway(e) if e.is_network())
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
