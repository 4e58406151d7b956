//! Service, flavor, and per-provider deployment records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A tenant's description of the CDN service it wants deployed.
///
/// Specs are immutable once handed to an operation; an update submits a new
/// spec rather than mutating the stored one.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceSpec {
    /// Service name, unique per tenant.
    pub name: String,
    /// Domains served by the CDN, in submission order.
    pub domains: Vec<Domain>,
    /// Origins the CDN pulls content from, in submission order.
    pub origins: Vec<Origin>,
    /// Caching rules, in submission order.
    #[serde(default)]
    pub caching: Vec<CachingRule>,
    /// Flavor selecting which providers host the service.
    pub flavor_id: String,
}

/// A domain fronted by the service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Domain {
    /// Fully qualified host name (for example `www.example.com`).
    pub domain: String,
    /// Protocol served on the domain.
    #[serde(default)]
    pub protocol: Protocol,
    /// Certificate flavour requested for `https` domains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateType>,
}

impl Domain {
    /// Builds a plain `http` domain.
    #[must_use]
    pub fn http(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            protocol: Protocol::Http,
            certificate: None,
        }
    }

    /// Builds an `https` domain using the given certificate type.
    #[must_use]
    pub fn https(domain: impl Into<String>, certificate: CertificateType) -> Self {
        Self {
            domain: domain.into(),
            protocol: Protocol::Https,
            certificate: Some(certificate),
        }
    }

    /// Returns `true` when the domain needs a shared SAN certificate slot.
    #[must_use]
    pub fn needs_san_certificate(&self) -> bool {
        self.protocol == Protocol::Https && self.certificate == Some(CertificateType::San)
    }
}

/// Protocol served for a domain.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP.
    #[default]
    Http,
    /// TLS terminated at the edge.
    Https,
}

/// Certificate types a provider can attach to an `https` domain.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    /// Shared certificate provided by the CDN.
    Shared,
    /// Multi-domain (subject alternative name) certificate.
    San,
    /// Tenant supplied certificate.
    Custom,
}

impl CertificateType {
    /// Wire label for the certificate type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::San => "san",
            Self::Custom => "custom",
        }
    }
}

/// An origin server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Origin {
    /// Origin host name or address.
    pub origin: String,
    /// Origin port.
    #[serde(default = "default_origin_port")]
    pub port: u16,
    /// Whether the CDN talks TLS to the origin.
    #[serde(default)]
    pub ssl: bool,
    /// Request rules routed to this origin.
    #[serde(default)]
    pub rules: Vec<RequestRule>,
}

impl Origin {
    /// Builds a plain `http` origin on the default port.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            port: default_origin_port(),
            ssl: false,
            rules: Vec::new(),
        }
    }
}

const fn default_origin_port() -> u16 {
    80
}

/// A caching rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CachingRule {
    /// Rule name.
    pub name: String,
    /// Time to live in seconds.
    pub ttl: u32,
    /// Requests the rule applies to.
    #[serde(default)]
    pub rules: Vec<RequestRule>,
}

/// A named request matcher.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestRule {
    /// Matcher name.
    pub name: String,
    /// URL pattern (for example `/images/*`).
    pub request_url: String,
}

/// A named tier mapping to the providers a service must be deployed to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Flavor {
    /// Flavor identifier referenced by [`ServiceSpec::flavor_id`].
    pub id: String,
    /// Providers hosting services of this flavor, in declaration order.
    pub providers: Vec<ProviderRef>,
}

/// Reference from a flavor to a registered provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderRef {
    /// Registry key of the provider (for example `akamai`).
    pub provider_id: String,
    /// Human readable label.
    pub label: String,
}

/// Deployment status of one provider for one service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// The provider is serving the service.
    Deployed,
    /// Creation was accepted by the provider and is propagating.
    DeployInProgress,
    /// An update is propagating.
    UpdateInProgress,
    /// Deletion has been requested and not yet confirmed.
    DeleteInProgress,
    /// The last provider call failed.
    Failed,
}

impl ProviderStatus {
    /// Wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::DeployInProgress => "deploy_in_progress",
            Self::UpdateInProgress => "update_in_progress",
            Self::DeleteInProgress => "delete_in_progress",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "deployed" => Some(Self::Deployed),
            "deploy_in_progress" | "create_in_progress" => Some(Self::DeployInProgress),
            "update_in_progress" => Some(Self::UpdateInProgress),
            "delete_in_progress" => Some(Self::DeleteInProgress),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A URL at which a provider serves the service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessUrl {
    /// Target URL or host name.
    pub href: String,
    /// Link relation (for example `access_url`).
    pub rel: String,
}

impl AccessUrl {
    /// Creates a link.
    #[must_use]
    pub fn new(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            rel: rel.into(),
        }
    }
}

/// Per-provider deployment record for one service.
///
/// `error_info` is present exactly when `status` is [`ProviderStatus::Failed`].
/// Fields are private so the only way to change the status is through the
/// methods below, which keep the two in step.
/// Deserializing rejects records that break that rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "RawProviderDetail")]
pub struct ProviderDetail {
    provider_service_id: Option<String>,
    #[serde(default)]
    access_urls: Vec<AccessUrl>,
    status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_info: Option<String>,
}

/// Errors raised when a stored provider detail breaks the status rule.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderDetailError {
    /// Raised when a failed detail carries no diagnostic.
    #[error("failed provider detail has no error_info")]
    FailedWithoutErrorInfo,
    /// Raised when a non-failed detail carries a diagnostic.
    #[error("provider detail with status {status} carries error_info")]
    ErrorInfoWithoutFailure {
        /// Status found on the record.
        status: ProviderStatus,
    },
}

#[derive(Deserialize)]
struct RawProviderDetail {
    provider_service_id: Option<String>,
    #[serde(default)]
    access_urls: Vec<AccessUrl>,
    status: ProviderStatus,
    #[serde(default)]
    error_info: Option<String>,
}

impl TryFrom<RawProviderDetail> for ProviderDetail {
    type Error = ProviderDetailError;

    fn try_from(raw: RawProviderDetail) -> Result<Self, Self::Error> {
        match (raw.status, raw.error_info.is_some()) {
            (ProviderStatus::Failed, false) => Err(ProviderDetailError::FailedWithoutErrorInfo),
            (ProviderStatus::Failed, true) | (_, false) => Ok(Self {
                provider_service_id: raw.provider_service_id,
                access_urls: raw.access_urls,
                status: raw.status,
                error_info: raw.error_info,
            }),
            (status, true) => Err(ProviderDetailError::ErrorInfoWithoutFailure { status }),
        }
    }
}

impl ProviderDetail {
    /// Builds a detail for a provider that accepted the service.
    #[must_use]
    pub fn provisioned(
        provider_service_id: impl Into<String>,
        access_urls: Vec<AccessUrl>,
        status: ProviderStatus,
    ) -> Self {
        let mut detail = Self {
            provider_service_id: Some(provider_service_id.into()),
            access_urls,
            status: ProviderStatus::Deployed,
            error_info: None,
        };
        detail.set_status(status);
        detail
    }

    /// Builds a detail for a provider whose call failed.
    #[must_use]
    pub fn failed(error_info: impl Into<String>) -> Self {
        Self {
            provider_service_id: None,
            access_urls: Vec::new(),
            status: ProviderStatus::Failed,
            error_info: Some(error_info.into()),
        }
    }

    /// Vendor assigned identifier, when the provider ever accepted the service.
    #[must_use]
    pub fn provider_service_id(&self) -> Option<&str> {
        self.provider_service_id.as_deref()
    }

    /// URLs at which the provider serves the service.
    #[must_use]
    pub fn access_urls(&self) -> &[AccessUrl] {
        &self.access_urls
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ProviderStatus {
        self.status
    }

    /// Diagnostic recorded with a failed status.
    #[must_use]
    pub fn error_info(&self) -> Option<&str> {
        self.error_info.as_deref()
    }

    /// Moves the detail to a non-failed status, clearing any diagnostic.
    ///
    /// Passing [`ProviderStatus::Failed`] records a generic diagnostic; use
    /// [`ProviderDetail::mark_failed`] to supply a specific one.
    pub fn set_status(&mut self, status: ProviderStatus) {
        if status == ProviderStatus::Failed {
            self.mark_failed("provider reported failure");
            return;
        }
        self.status = status;
        self.error_info = None;
    }

    /// Marks the detail failed with the given diagnostic, keeping any ids.
    pub fn mark_failed(&mut self, error_info: impl Into<String>) {
        self.status = ProviderStatus::Failed;
        self.error_info = Some(error_info.into());
    }

    /// Replaces the provider id and access URLs when a response supplies new
    /// ones. Empty values leave the current ones in place.
    pub fn refresh_identity(&mut self, provider_service_id: &str, access_urls: &[AccessUrl]) {
        if !provider_service_id.trim().is_empty() {
            self.provider_service_id = Some(provider_service_id.to_owned());
        }
        if !access_urls.is_empty() {
            self.access_urls = access_urls.to_vec();
        }
    }
}

/// Persisted state of a service across all of its providers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Current service description.
    pub spec: ServiceSpec,
    /// Per-provider deployment state keyed by provider name.
    #[serde(default)]
    pub provider_details: BTreeMap<String, ProviderDetail>,
    /// Most recent asynchronous delete attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delete_attempt: Option<DeleteAttempt>,
}

impl ServiceRecord {
    /// Creates a record with no provider details yet.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, spec: ServiceSpec) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            spec,
            provider_details: BTreeMap::new(),
            last_delete_attempt: None,
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Aggregate tenant-facing status derived from the provider details.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::aggregate(self.provider_details.values().map(ProviderDetail::status))
    }
}

/// Tenant-facing status of a whole service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Creation has not completed on every provider.
    CreateInProgress,
    /// Every provider serves the service.
    Deployed,
    /// An update is propagating on at least one provider.
    UpdateInProgress,
    /// Deletion is pending on at least one provider.
    DeleteInProgress,
    /// At least one provider failed.
    Failed,
}

impl ServiceStatus {
    /// Folds provider statuses into one service status.
    ///
    /// `Failed` wins over everything, `Deployed` requires every provider to be
    /// deployed, and mixed in-progress states resolve delete before update
    /// before create. A service with no providers yet is still being created.
    pub fn aggregate(statuses: impl IntoIterator<Item = ProviderStatus>) -> Self {
        let mut seen_any = false;
        let mut all_deployed = true;
        let mut deleting = false;
        let mut updating = false;
        for status in statuses {
            seen_any = true;
            match status {
                ProviderStatus::Failed => return Self::Failed,
                ProviderStatus::Deployed => {}
                ProviderStatus::DeleteInProgress => {
                    all_deployed = false;
                    deleting = true;
                }
                ProviderStatus::UpdateInProgress => {
                    all_deployed = false;
                    updating = true;
                }
                ProviderStatus::DeployInProgress => all_deployed = false,
            }
        }

        if !seen_any {
            Self::CreateInProgress
        } else if all_deployed {
            Self::Deployed
        } else if deleting {
            Self::DeleteInProgress
        } else if updating {
            Self::UpdateInProgress
        } else {
            Self::CreateInProgress
        }
    }
}

/// Record of the latest asynchronous delete attempt on a service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeleteAttempt {
    /// When phase one accepted the delete.
    pub attempted_at: DateTime<Utc>,
    /// What the worker concluded, or `Pending` while it runs.
    pub outcome: DeleteAttemptOutcome,
}

/// Outcome of a delete attempt as seen by operators.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeleteAttemptOutcome {
    /// The worker has been dispatched and has not reported back.
    Pending,
    /// One or more providers refused or failed the delete.
    ProviderErrors {
        /// Providers whose delete failed.
        providers: Vec<String>,
    },
}

/// Serialized request for a vendor operation that must run single-flight,
/// such as adding a domain to a shared SAN certificate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ModSanRequest {
    /// Certificate type (normally `san`).
    pub cert_type: String,
    /// Domain to add to the certificate.
    pub domain_name: String,
    /// Flavor of the owning service.
    pub flavor_id: String,
    /// Operator note that the owning service should be validated. Carried
    /// on the wire only; the worker does not act on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_service: Option<bool>,
}

impl ModSanRequest {
    /// Builds a SAN certificate request for a domain.
    #[must_use]
    pub fn san(domain_name: impl Into<String>, flavor_id: impl Into<String>) -> Self {
        Self {
            cert_type: CertificateType::San.as_str().to_owned(),
            domain_name: domain_name.into(),
            flavor_id: flavor_id.into(),
            validate_service: None,
        }
    }

    /// Encodes the request as the opaque queue payload.
    ///
    /// # Errors
    ///
    /// Returns the serializer error when encoding fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a queue payload.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error when the payload is not a request.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
