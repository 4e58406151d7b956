//! Multi-provider service orchestration.
//!
//! The orchestrator resolves which providers host a service, fans lifecycle
//! calls out through the [`ProviderRegistry`], records one
//! [`ProviderDetail`] per provider, and leaves the tenant-facing status to be
//! derived from those details. A provider failing is data, not an error:
//! callers always get every provider's outcome back.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::{
    DeleteAttempt, DeleteAttemptOutcome, ModSanRequest, ProviderDetail, ProviderStatus,
    ServiceRecord, ServiceSpec,
};
use crate::provider::{ProviderCall, ProviderOutcome, ProviderRegistry};
use crate::queue::ModSanQueue;
use crate::storage::{FlavorStore, ServiceStore};

mod delete;
mod error;

pub use delete::{DeleteOutcome, DeleteTicket};
pub use error::OrchestratorError;

use delete::DeleteJob;

/// Per-provider outcomes of one orchestrated call, keyed by provider name.
pub type Outcomes = BTreeMap<String, ProviderOutcome>;

/// Diagnostic recorded when an operator forces a service to failed.
pub const OPERATOR_FAILURE: &str = "marked failed by operator";

/// Status an operator may force onto every provider of a service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorState {
    /// Treat the service as serving on every provider.
    Deployed,
    /// Treat the service as failed on every provider.
    Failed,
}

/// Liveness of each provider and of the storage engine.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct HealthReport {
    /// Provider name to liveness.
    pub providers: BTreeMap<String, bool>,
    /// Storage name to liveness.
    pub storage: BTreeMap<String, bool>,
}

impl HealthReport {
    /// Reports whether every dependency is alive.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.providers.values().chain(self.storage.values()).all(|alive| *alive)
    }
}

/// Drives service lifecycles across providers.
#[derive(Clone)]
pub struct ServiceOrchestrator {
    services: Arc<dyn ServiceStore>,
    flavors: Arc<dyn FlavorStore>,
    providers: Arc<ProviderRegistry>,
    mod_san_queue: Option<ModSanQueue>,
}

impl std::fmt::Debug for ServiceOrchestrator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceOrchestrator")
            .field("storage", &self.services.storage_name())
            .field("providers", &self.providers)
            .field("mod_san_queue", &self.mod_san_queue)
            .finish_non_exhaustive()
    }
}

impl ServiceOrchestrator {
    /// Creates an orchestrator over the given stores and providers.
    #[must_use]
    pub fn new(
        services: Arc<dyn ServiceStore>,
        flavors: Arc<dyn FlavorStore>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            services,
            flavors,
            providers: Arc::new(providers),
            mod_san_queue: None,
        }
    }

    /// Queues SAN certificate requests for `https` domains on create.
    #[must_use]
    pub fn with_mod_san_queue(mut self, queue: ModSanQueue) -> Self {
        self.mod_san_queue = Some(queue);
        self
    }

    /// Provider registry used for fan-out.
    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Creates a service on every provider of its flavor.
    ///
    /// The record is persisted before any provider is called and the detail
    /// mapping is written once, after all providers have answered, with one
    /// entry per flavor provider.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::FlavorNotFound`] or
    /// [`OrchestratorError::AlreadyExists`] before any provider is called,
    /// [`OrchestratorError::Storage`] when persistence fails, and
    /// [`OrchestratorError::Queue`] when a SAN request cannot be queued.
    pub async fn create(
        &self,
        tenant_id: &str,
        spec: ServiceSpec,
    ) -> Result<Outcomes, OrchestratorError> {
        let flavor = self.flavors.get(&spec.flavor_id)?;
        self.services
            .create(ServiceRecord::new(tenant_id, spec.clone()))?;
        tracing::info!(
            tenant = %tenant_id,
            service = %spec.name,
            flavor = %flavor.id,
            providers = flavor.providers.len(),
            "creating service"
        );

        let outcomes = self
            .providers
            .map(flavor.providers.iter().map(|provider| {
                (provider.provider_id.as_str(), ProviderCall::Create { spec: &spec })
            }))
            .await;
        let details = outcomes
            .iter()
            .map(|(name, outcome)| (name.clone(), created_detail(outcome)))
            .collect();
        self.services
            .update_provider_details(tenant_id, &spec.name, details)?;

        self.queue_san_requests(&spec)?;
        Ok(outcomes)
    }

    /// Applies a new spec on every provider already recorded for the service.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidUpdate`] when the new service spec renames the
    /// service, [`OrchestratorError::NotFound`] when it does not exist, and
    /// [`OrchestratorError::Storage`] when persistence fails.
    pub async fn update(
        &self,
        tenant_id: &str,
        service_name: &str,
        spec: ServiceSpec,
    ) -> Result<Outcomes, OrchestratorError> {
        if spec.name != service_name {
            return Err(OrchestratorError::InvalidUpdate {
                service_name: service_name.to_owned(),
                spec_name: spec.name,
            });
        }
        self.services
            .update_spec(tenant_id, service_name, spec.clone())?;
        let mut details = self.services.get_provider_details(tenant_id, service_name)?;
        tracing::info!(
            tenant = %tenant_id,
            service = %service_name,
            providers = details.len(),
            "updating service"
        );

        let outcomes = self
            .providers
            .map(details.iter().map(|(name, detail)| {
                (
                    name.as_str(),
                    ProviderCall::Update {
                        provider_service_id: detail.provider_service_id(),
                        spec: &spec,
                    },
                )
            }))
            .await;
        for (name, detail) in &mut details {
            apply_update(detail, outcomes.get(name));
        }
        self.services
            .update_provider_details(tenant_id, service_name, details)?;
        Ok(outcomes)
    }

    /// Starts an asynchronous delete and returns immediately.
    ///
    /// Every provider is marked `delete_in_progress` and a pending attempt is
    /// recorded in one store write before the worker is dispatched. The
    /// worker removes the record only when every provider confirms.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when the service does not
    /// exist, [`OrchestratorError::Storage`] when phase one cannot persist,
    /// and [`OrchestratorError::Runtime`] outside a Tokio runtime.
    pub fn delete(
        &self,
        tenant_id: &str,
        service_name: &str,
    ) -> Result<DeleteTicket, OrchestratorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(OrchestratorError::Runtime)?;
        let attempted_at = Utc::now();
        let details = self.services.begin_delete(
            tenant_id,
            service_name,
            DeleteAttempt {
                attempted_at,
                outcome: DeleteAttemptOutcome::Pending,
            },
        )?;
        let targets = details
            .iter()
            .map(|(name, detail)| (name.clone(), detail.provider_service_id().map(str::to_owned)))
            .collect();
        tracing::info!(tenant = %tenant_id, service = %service_name, "dispatching delete worker");

        Ok(DeleteJob {
            services: Arc::clone(&self.services),
            providers: Arc::clone(&self.providers),
            tenant_id: tenant_id.to_owned(),
            service_name: service_name.to_owned(),
            attempted_at,
            targets,
        }
        .spawn(&runtime))
    }

    /// Purges cached content on every provider of the service, everything
    /// when `url` is `None`. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when the service does not
    /// exist.
    pub async fn purge(
        &self,
        tenant_id: &str,
        service_name: &str,
        url: Option<&str>,
    ) -> Result<Outcomes, OrchestratorError> {
        let details = self.services.get_provider_details(tenant_id, service_name)?;
        tracing::info!(tenant = %tenant_id, service = %service_name, url = ?url, "purging service");
        Ok(self
            .providers
            .map(details.iter().map(|(name, detail)| {
                (
                    name.as_str(),
                    ProviderCall::Purge {
                        provider_service_id: detail.provider_service_id(),
                        url,
                    },
                )
            }))
            .await)
    }

    /// Loads one service.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when the service does not
    /// exist.
    pub fn get(
        &self,
        tenant_id: &str,
        service_name: &str,
    ) -> Result<ServiceRecord, OrchestratorError> {
        Ok(self.services.get(tenant_id, service_name)?)
    }

    /// Lists a tenant's services ordered by name, after `marker`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] when the store fails.
    pub fn list(
        &self,
        tenant_id: &str,
        marker: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ServiceRecord>, OrchestratorError> {
        Ok(self.services.list(tenant_id, marker, limit)?)
    }

    /// Forces every provider of a service to an operator chosen state.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when the service does not
    /// exist.
    pub fn update_state(
        &self,
        tenant_id: &str,
        service_name: &str,
        state: OperatorState,
    ) -> Result<BTreeMap<String, ProviderDetail>, OrchestratorError> {
        let mut details = self.services.get_provider_details(tenant_id, service_name)?;
        for detail in details.values_mut() {
            match state {
                OperatorState::Deployed => detail.set_status(ProviderStatus::Deployed),
                OperatorState::Failed => detail.mark_failed(OPERATOR_FAILURE),
            }
        }
        tracing::info!(
            tenant = %tenant_id,
            service = %service_name,
            state = ?state,
            "operator state override"
        );
        Ok(self
            .services
            .update_provider_details(tenant_id, service_name, details)?)
    }

    /// Checks every provider and the storage engine.
    pub async fn health(&self) -> HealthReport {
        let providers = self.providers.health().await;
        let storage = BTreeMap::from([(
            self.services.storage_name().to_owned(),
            self.services.is_alive(),
        )]);
        HealthReport { providers, storage }
    }

    fn queue_san_requests(&self, spec: &ServiceSpec) -> Result<(), OrchestratorError> {
        let Some(queue) = &self.mod_san_queue else {
            return Ok(());
        };
        for domain in spec.domains.iter().filter(|domain| domain.needs_san_certificate()) {
            let payload = ModSanRequest::san(&domain.domain, &spec.flavor_id)
                .to_payload()
                .map_err(OrchestratorError::Payload)?;
            queue.enqueue(&payload)?;
            tracing::info!(domain = %domain.domain, "queued SAN certificate request");
        }
        Ok(())
    }
}

fn created_detail(outcome: &ProviderOutcome) -> ProviderDetail {
    match outcome {
        ProviderOutcome::Success(success) => ProviderDetail::provisioned(
            success.id.clone(),
            success.links.clone(),
            success.status.unwrap_or(ProviderStatus::Deployed),
        ),
        ProviderOutcome::Failure(failure) => ProviderDetail::failed(failure.error_detail.clone()),
    }
}

fn apply_update(detail: &mut ProviderDetail, outcome: Option<&ProviderOutcome>) {
    match outcome {
        Some(ProviderOutcome::Success(success)) => {
            detail.set_status(success.status.unwrap_or(ProviderStatus::Deployed));
            detail.refresh_identity(&success.id, &success.links);
        }
        Some(ProviderOutcome::Failure(failure)) => detail.mark_failed(failure.error_detail.clone()),
        None => detail.mark_failed("provider returned no outcome"),
    }
}
