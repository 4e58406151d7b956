//! Record stores for services, provider details, and flavors.
//!
//! The orchestrator only depends on the [`ServiceStore`] and [`FlavorStore`]
//! traits so storage engines can be swapped without touching the
//! reconciliation logic. [`memory`] provides the in-process engine used by
//! embedders and the tests.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{DeleteAttempt, Flavor, ProviderDetail, ServiceRecord, ServiceSpec};

pub mod memory;

pub use memory::{MemoryFlavorStore, MemoryServiceStore};

/// Page size used by [`ServiceStore::list`] when the caller gives none.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Errors raised by record stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the requested record does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Record kind (`service` or `flavor`).
        kind: &'static str,
        /// Name or identifier that was looked up.
        name: String,
    },
    /// Raised when creating a record whose key is already taken.
    #[error("service {name} already exists for tenant {tenant_id}")]
    AlreadyExists {
        /// Owning tenant.
        tenant_id: String,
        /// Service name.
        name: String,
    },
    /// Raised when the storage engine cannot be reached.
    #[error("storage {storage} unavailable: {message}")]
    Unavailable {
        /// Storage engine name.
        storage: String,
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Builds a missing-service error.
    #[must_use]
    pub fn service_not_found(service_name: &str) -> Self {
        Self::NotFound {
            kind: "service",
            name: service_name.to_owned(),
        }
    }
}

/// Persistence of service records and their provider details.
///
/// Every method addresses a record by `(tenant_id, service_name)`.
pub trait ServiceStore: Send + Sync {
    /// Name reported by health checks.
    fn storage_name(&self) -> &str;

    /// Reports whether the engine is reachable.
    fn is_alive(&self) -> bool;

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the tenant already owns a
    /// service with the same name.
    fn create(&self, record: ServiceRecord) -> Result<(), StoreError>;

    /// Loads a whole record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn get(&self, tenant_id: &str, service_name: &str) -> Result<ServiceRecord, StoreError>;

    /// Replaces the stored spec, leaving provider details untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn update_spec(
        &self,
        tenant_id: &str,
        service_name: &str,
        spec: ServiceSpec,
    ) -> Result<(), StoreError>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn delete(&self, tenant_id: &str, service_name: &str) -> Result<(), StoreError>;

    /// Lists a tenant's records ordered by service name, starting strictly
    /// after `marker` and returning at most `limit` entries
    /// ([`DEFAULT_LIST_LIMIT`] when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the engine cannot be read.
    fn list(
        &self,
        tenant_id: &str,
        marker: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ServiceRecord>, StoreError>;

    /// Loads the provider detail mapping of a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn get_provider_details(
        &self,
        tenant_id: &str,
        service_name: &str,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError>;

    /// Atomically replaces the provider detail mapping and returns what was
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn update_provider_details(
        &self,
        tenant_id: &str,
        service_name: &str,
        details: BTreeMap<String, ProviderDetail>,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError>;

    /// Stores the latest delete attempt on a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent.
    fn record_delete_attempt(
        &self,
        tenant_id: &str,
        service_name: &str,
        attempt: DeleteAttempt,
    ) -> Result<(), StoreError>;

    /// Marks every provider `delete_in_progress` and records `attempt` in a
    /// single write, returning the persisted mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record is absent; nothing is
    /// written in that case.
    fn begin_delete(
        &self,
        tenant_id: &str,
        service_name: &str,
        attempt: DeleteAttempt,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError>;
}

/// Read-only access to flavor reference data.
pub trait FlavorStore: Send + Sync {
    /// Loads a flavor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the flavor is unknown.
    fn get(&self, flavor_id: &str) -> Result<Flavor, StoreError>;
}
