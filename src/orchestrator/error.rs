//! Error types for service orchestration.

use thiserror::Error;

use crate::queue::QueueError;
use crate::storage::StoreError;

/// Errors surfaced to callers of [`super::ServiceOrchestrator`].
///
/// Individual provider failures are not errors: they are recorded in the
/// provider details and returned as outcomes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Raised when a service spec references an unknown flavor.
    #[error("flavor {flavor_id} not found")]
    FlavorNotFound {
        /// Requested flavor.
        flavor_id: String,
    },
    /// Raised when the addressed service does not exist.
    #[error("service {service_name} not found")]
    NotFound {
        /// Requested service.
        service_name: String,
    },
    /// Raised when creating a service whose name is taken.
    #[error("service {service_name} already exists for tenant {tenant_id}")]
    AlreadyExists {
        /// Owning tenant.
        tenant_id: String,
        /// Conflicting name.
        service_name: String,
    },
    /// Raised when an update tries to rename the service.
    #[error("update for service {service_name} carries a spec named {spec_name}")]
    InvalidUpdate {
        /// Service being updated.
        service_name: String,
        /// Name found in the new spec.
        spec_name: String,
    },
    /// Raised when the delete worker cannot be dispatched because no async
    /// runtime is running.
    #[error("cannot dispatch delete worker: {0}")]
    Runtime(#[source] tokio::runtime::TryCurrentError),
    /// Raised when the storage engine fails.
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
    /// Raised when a SAN request cannot be queued.
    #[error("failed to queue SAN certificate request: {0}")]
    Queue(#[from] QueueError),
    /// Raised when a SAN request cannot be encoded.
    #[error("failed to encode SAN certificate request: {0}")]
    Payload(#[source] serde_json::Error),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                kind: "flavor",
                name,
            } => Self::FlavorNotFound { flavor_id: name },
            StoreError::NotFound { name, .. } => Self::NotFound { service_name: name },
            StoreError::AlreadyExists { tenant_id, name } => Self::AlreadyExists {
                tenant_id,
                service_name: name,
            },
            other @ StoreError::Unavailable { .. } => Self::Storage(other),
        }
    }
}

impl OrchestratorError {
    /// Reports whether the error means the addressed record does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::FlavorNotFound { .. })
    }
}
