//! Remote Gateway: the only component that talks to the server.
//!
//! The gateway never touches the Local Store; it turns operations into
//! requests and responses into results.

mod http;
mod memory;

pub use http::{procedure_for, HttpGateway, PAGE_SIZE};
pub use memory::{InMemoryRemote, RemoteCall};

use async_trait::async_trait;
use worthy_engine::{EntityType, Record, SyncOperation};

/// Gateway failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No response at all: offline, DNS, refused connection, timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The server answered successfully but the body made no sense.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether the server is unreachable. Network errors halt a drain pass;
    /// anything else only fails the item at hand.
    pub fn is_network(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }
}

/// What the server told us about an executed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteResult {
    /// Id assigned by the server on create.
    pub server_id: Option<i64>,
}

/// Access to the remote API.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Deliver one operation. `key` identifies the delivery and is stable
    /// across retries of the same queue item.
    async fn execute(&self, key: &str, operation: &SyncOperation)
        -> Result<RemoteResult, GatewayError>;

    /// Every record of `entity` the server holds for this user.
    async fn fetch_all(&self, entity: EntityType) -> Result<Vec<Record>, GatewayError>;

    /// Whether the server is reachable.
    async fn ping(&self) -> bool;
}

#[async_trait]
impl<G: RemoteGateway + ?Sized> RemoteGateway for std::sync::Arc<G> {
    async fn execute(
        &self,
        key: &str,
        operation: &SyncOperation,
    ) -> Result<RemoteResult, GatewayError> {
        (**self).execute(key, operation).await
    }

    async fn fetch_all(&self, entity: EntityType) -> Result<Vec<Record>, GatewayError> {
        (**self).fetch_all(entity).await
    }

    async fn ping(&self) -> bool {
        (**self).ping().await
    }
}
