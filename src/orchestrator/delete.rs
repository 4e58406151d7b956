//! Second phase of service deletion.
//!
//! Phase one has already marked every provider `delete_in_progress`; the
//! worker asks each provider to delete and removes the record only when all
//! of them confirm. A partial failure leaves the record in place with the
//! failing providers noted on `last_delete_attempt`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::model::{DeleteAttempt, DeleteAttemptOutcome};
use crate::provider::{ProviderCall, ProviderOutcome, ProviderRegistry};
use crate::storage::ServiceStore;

/// Conclusion reached by the delete worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// Every provider confirmed and the record was removed.
    Deleted,
    /// At least one provider failed; the record remains.
    ProviderErrors {
        /// Providers whose delete failed.
        providers: Vec<String>,
    },
    /// The worker could not finish, for example because storage failed.
    WorkerFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Handle on a dispatched delete worker.
///
/// Dropping the ticket detaches the worker; it keeps running.
#[derive(Debug)]
pub struct DeleteTicket {
    tenant_id: String,
    service_name: String,
    attempted_at: DateTime<Utc>,
    handle: JoinHandle<DeleteOutcome>,
}

impl DeleteTicket {
    /// Owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Service being deleted.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// When phase one accepted the delete.
    #[must_use]
    pub const fn attempted_at(&self) -> DateTime<Utc> {
        self.attempted_at
    }

    /// Reports whether the worker has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and returns its conclusion.
    pub async fn outcome(self) -> DeleteOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => DeleteOutcome::WorkerFailed {
                message: err.to_string(),
            },
        }
    }
}

pub(super) struct DeleteJob {
    pub(super) services: Arc<dyn ServiceStore>,
    pub(super) providers: Arc<ProviderRegistry>,
    pub(super) tenant_id: String,
    pub(super) service_name: String,
    pub(super) attempted_at: DateTime<Utc>,
    /// Provider name and recorded vendor id, captured in phase one.
    pub(super) targets: Vec<(String, Option<String>)>,
}

impl DeleteJob {
    pub(super) fn spawn(self, runtime: &Handle) -> DeleteTicket {
        let tenant_id = self.tenant_id.clone();
        let service_name = self.service_name.clone();
        let attempted_at = self.attempted_at;
        let handle = runtime.spawn(self.run());
        DeleteTicket {
            tenant_id,
            service_name,
            attempted_at,
            handle,
        }
    }

    async fn run(self) -> DeleteOutcome {
        let outcomes = self
            .providers
            .map(self.targets.iter().map(|(name, id)| {
                (
                    name.as_str(),
                    ProviderCall::Delete {
                        provider_service_id: id.as_deref(),
                    },
                )
            }))
            .await;
        let failed = failed_providers(&outcomes);

        if failed.is_empty() {
            return match self.services.delete(&self.tenant_id, &self.service_name) {
                Ok(()) => {
                    tracing::info!(
                        tenant = %self.tenant_id,
                        service = %self.service_name,
                        "service deleted from every provider"
                    );
                    DeleteOutcome::Deleted
                }
                Err(err) => self.worker_failed(&err),
            };
        }

        tracing::warn!(
            tenant = %self.tenant_id,
            service = %self.service_name,
            providers = ?failed,
            "delete failed on some providers; keeping service record"
        );
        let attempt = DeleteAttempt {
            attempted_at: self.attempted_at,
            outcome: DeleteAttemptOutcome::ProviderErrors {
                providers: failed.clone(),
            },
        };
        match self
            .services
            .record_delete_attempt(&self.tenant_id, &self.service_name, attempt)
        {
            Ok(()) => DeleteOutcome::ProviderErrors { providers: failed },
            Err(err) => self.worker_failed(&err),
        }
    }

    fn worker_failed(&self, err: &dyn std::error::Error) -> DeleteOutcome {
        tracing::error!(
            tenant = %self.tenant_id,
            service = %self.service_name,
            error = %err,
            "delete worker could not record its outcome"
        );
        DeleteOutcome::WorkerFailed {
            message: err.to_string(),
        }
    }
}

fn failed_providers(outcomes: &BTreeMap<String, ProviderOutcome>) -> Vec<String> {
    outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_failure())
        .map(|(name, _)| name.clone())
        .collect()
}
