//! Provider adapter contract and the tagged per-call outcome.
//!
//! Each CDN vendor integration implements [`ProviderAdapter`]. Adapters never
//! decide aggregate state: they report one [`ProviderOutcome`] per call and
//! the [`registry::ProviderRegistry`] turns adapter errors and timeouts into
//! failure outcomes so that one vendor cannot abort a fan-out.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AccessUrl, ProviderStatus, ServiceSpec};

pub mod registry;

pub use registry::{ProviderCall, ProviderRegistry};

/// Future returned by provider adapter operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Interface implemented by every CDN vendor integration.
pub trait ProviderAdapter: Send + Sync {
    /// Vendor label used to key outcomes and provider details (for example
    /// `Akamai`).
    fn provider_name(&self) -> &str;

    /// Creates the service on the vendor.
    fn create<'a>(&'a self, spec: &'a ServiceSpec) -> ProviderFuture<'a, ProviderOutcome>;

    /// Applies a new spec to an existing vendor configuration.
    fn update<'a>(
        &'a self,
        provider_service_id: &'a str,
        spec: &'a ServiceSpec,
    ) -> ProviderFuture<'a, ProviderOutcome>;

    /// Removes the vendor configuration.
    fn delete<'a>(&'a self, provider_service_id: &'a str) -> ProviderFuture<'a, ProviderOutcome>;

    /// Purges cached content, everything when `url` is `None`.
    fn purge<'a>(
        &'a self,
        provider_service_id: &'a str,
        url: Option<&'a str>,
    ) -> ProviderFuture<'a, ProviderOutcome>;

    /// Reports whether the vendor API is reachable.
    fn is_alive(&self) -> ProviderFuture<'_, bool>;
}

/// Result of one provider call as reported by the vendor.
///
/// Serializes to the raw wire shapes `{id, links, status?}` and
/// `{error, error_detail}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderOutcome {
    /// The vendor accepted the call.
    Success(ProviderSuccess),
    /// The vendor rejected the call, or the call never completed.
    Failure(ProviderFailure),
}

impl ProviderOutcome {
    /// Builds a success outcome.
    #[must_use]
    pub fn success(id: impl Into<String>, links: Vec<AccessUrl>) -> Self {
        Self::Success(ProviderSuccess {
            id: id.into(),
            links,
            status: None,
        })
    }

    /// Builds a failure outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>, error_detail: impl Into<String>) -> Self {
        Self::Failure(ProviderFailure {
            error: error.into(),
            error_detail: error_detail.into(),
        })
    }

    /// Returns `true` for [`ProviderOutcome::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Payload of a successful provider call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderSuccess {
    /// Vendor assigned service identifier.
    #[serde(default)]
    pub id: String,
    /// Access URLs reported by the vendor.
    #[serde(default)]
    pub links: Vec<AccessUrl>,
    /// Status reported by the vendor, when it is not immediately deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProviderStatus>,
}

impl ProviderSuccess {
    /// Sets the vendor reported status.
    #[must_use]
    pub const fn with_status(mut self, status: ProviderStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Payload of a failed provider call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderFailure {
    /// Short failure summary.
    pub error: String,
    /// Diagnostic detail recorded as the provider detail's `error_info`.
    pub error_detail: String,
}

/// Errors raised by adapters or by the registry while invoking one.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when the vendor API cannot be reached.
    #[error("transport error talking to {provider}: {message}")]
    Transport {
        /// Provider label.
        provider: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the vendor answers with something the adapter cannot use.
    #[error("unexpected response from {provider}: {message}")]
    UnexpectedResponse {
        /// Provider label.
        provider: String,
        /// Description of the response.
        message: String,
    },
    /// Raised when a flavor names a provider that is not registered.
    #[error("provider {provider} is not registered")]
    NotRegistered {
        /// Provider key requested by the flavor or detail map.
        provider: String,
    },
    /// Raised when a call needs a vendor id that was never recorded.
    #[error(
        "no provider detail information for {provider}; perhaps the service has not been created"
    )]
    MissingProviderServiceId {
        /// Provider label.
        provider: String,
    },
    /// Raised when a call exceeds the per-call timeout.
    #[error("{operation} on {provider} timed out after {millis}ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Provider label.
        provider: String,
        /// Timeout that elapsed, in milliseconds.
        millis: u64,
    },
}
