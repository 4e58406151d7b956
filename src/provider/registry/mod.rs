//! Provider registry and the independent fan-out used by every lifecycle call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

use super::{ProviderAdapter, ProviderError, ProviderOutcome};
use crate::model::ServiceSpec;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One provider operation with its per-provider arguments.
///
/// Update, delete and purge carry the vendor id recorded for the provider;
/// `None` means no id was ever recorded. Update and purge then fail without
/// reaching the vendor, while delete succeeds because the vendor holds
/// nothing to remove.
#[derive(Clone, Copy, Debug)]
pub enum ProviderCall<'a> {
    /// Create the service from a spec.
    Create {
        /// Spec to deploy.
        spec: &'a ServiceSpec,
    },
    /// Apply a new spec.
    Update {
        /// Vendor id recorded at creation.
        provider_service_id: Option<&'a str>,
        /// Spec to apply.
        spec: &'a ServiceSpec,
    },
    /// Remove the vendor configuration.
    Delete {
        /// Vendor id recorded at creation.
        provider_service_id: Option<&'a str>,
    },
    /// Purge cached content.
    Purge {
        /// Vendor id recorded at creation.
        provider_service_id: Option<&'a str>,
        /// URL to purge, everything when `None`.
        url: Option<&'a str>,
    },
}

impl ProviderCall<'_> {
    /// Operation name used in logs and failure summaries.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Purge { .. } => "purge",
        }
    }
}

/// Maps provider keys to adapters and fans calls out across them.
///
/// Keys are case-insensitive. Flavors reference providers by registration
/// key (`akamai`) while detail maps are keyed by the adapter's vendor label
/// (`Akamai Technologies`), so lookups resolve through both.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ProviderAdapter>>,
    labels: BTreeMap<String, String>,
    call_timeout: Duration,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry using the default per-call timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            labels: BTreeMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Registers an adapter under `key`, replacing any previous adapter.
    #[must_use]
    pub fn with_provider(mut self, key: &str, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(key, adapter);
        self
    }

    /// Registers an adapter under `key`, replacing any previous adapter.
    pub fn register(&mut self, key: &str, adapter: Arc<dyn ProviderAdapter>) {
        let key = normalise_key(key);
        self.labels.retain(|_, registered| *registered != key);
        self.labels
            .insert(normalise_key(adapter.provider_name()), key.clone());
        self.providers.insert(key, adapter);
    }

    /// Looks up an adapter by registration key, falling back to the vendor
    /// label it reports.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        let key = normalise_key(key);
        self.providers.get(&key).or_else(|| {
            self.labels
                .get(&key)
                .and_then(|registered| self.providers.get(registered))
        })
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Per-call timeout applied by [`ProviderRegistry::map`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Applies each call to its provider concurrently and collects one
    /// outcome per provider, keyed by the vendor label.
    ///
    /// A provider that errors, times out, is missing from the registry, or
    /// lacks a recorded vendor id yields a failure outcome; it never prevents
    /// the remaining providers from being called.
    pub async fn map<'a, I>(&self, calls: I) -> BTreeMap<String, ProviderOutcome>
    where
        I: IntoIterator<Item = (&'a str, ProviderCall<'a>)>,
    {
        let pending = calls
            .into_iter()
            .map(|(key, call)| self.dispatch(key, call));
        join_all(pending).await.into_iter().collect()
    }

    /// Queries every registered provider's liveness concurrently.
    ///
    /// Errors and timeouts count as not alive.
    pub async fn health(&self) -> BTreeMap<String, bool> {
        let checks = self.providers.values().map(|adapter| async move {
            let name = adapter.provider_name().to_owned();
            let alive = matches!(
                timeout(self.call_timeout, adapter.is_alive()).await,
                Ok(Ok(true))
            );
            (name, alive)
        });
        join_all(checks).await.into_iter().collect()
    }

    async fn dispatch(&self, key: &str, call: ProviderCall<'_>) -> (String, ProviderOutcome) {
        let operation = call.operation();
        let Some(adapter) = self.get(key) else {
            let err = ProviderError::NotRegistered {
                provider: key.to_owned(),
            };
            tracing::warn!(provider = %key, operation, "provider not registered");
            return (key.to_owned(), failure_outcome(operation, &err));
        };

        let name = adapter.provider_name().to_owned();
        let outcome = match self.invoke(adapter.as_ref(), &name, call).await {
            Ok(outcome) => outcome,
            Err(err) => failure_outcome(operation, &err),
        };

        if let ProviderOutcome::Failure(failure) = &outcome {
            tracing::warn!(
                provider = %name,
                operation,
                error = %failure.error_detail,
                "provider call failed"
            );
        } else {
            tracing::debug!(provider = %name, operation, "provider call succeeded");
        }
        (name, outcome)
    }

    async fn invoke(
        &self,
        adapter: &dyn ProviderAdapter,
        name: &str,
        call: ProviderCall<'_>,
    ) -> Result<ProviderOutcome, ProviderError> {
        let missing_id = || ProviderError::MissingProviderServiceId {
            provider: name.to_owned(),
        };
        let future = match call {
            ProviderCall::Create { spec } => adapter.create(spec),
            ProviderCall::Update {
                provider_service_id,
                spec,
            } => adapter.update(usable_id(provider_service_id).ok_or_else(missing_id)?, spec),
            ProviderCall::Delete {
                provider_service_id,
            } => {
                let Some(id) = usable_id(provider_service_id) else {
                    tracing::info!(provider = %name, "no vendor id recorded; nothing to delete");
                    return Ok(ProviderOutcome::success("", Vec::new()));
                };
                adapter.delete(id)
            }
            ProviderCall::Purge {
                provider_service_id,
                url,
            } => adapter.purge(usable_id(provider_service_id).ok_or_else(missing_id)?, url),
        };

        timeout(self.call_timeout, future)
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    operation: call.operation().to_owned(),
                    provider: name.to_owned(),
                    millis: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }
}

fn normalise_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

fn usable_id(provider_service_id: Option<&str>) -> Option<&str> {
    provider_service_id.filter(|id| !id.trim().is_empty())
}

fn failure_outcome(operation: &str, err: &ProviderError) -> ProviderOutcome {
    ProviderOutcome::failure(format!("{operation} failed"), err.to_string())
}
