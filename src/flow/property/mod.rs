//! Property update pipeline: pick a writable version, edit its hostnames,
//! then activate it on the staging network.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    Flow, FlowError, FlowFuture, FlowStep, FlowStore, PapiClient, PapiError, PapiResponse,
};

/// Binding holding the version the flow edits and activates.
pub const NEW_VERSION_NUMBER: &str = "new_version_number";
/// Binding holding the ordered `(action, host)` edits.
pub const UPDATE_INFO_LIST: &str = "update_info_list";
/// Binding holding the addresses notified about activation.
pub const NOTIFY_EMAILS: &str = "notify_emails";
/// Binding holding the hostname list that was written.
pub const HOSTNAMES: &str = "hostnames";
/// Binding holding the activation link returned by the vendor.
pub const ACTIVATION_LINK: &str = "activation_link";

const ACTIVATION_NETWORK: &str = "STAGING";

/// Vendor property the pipeline operates on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PropertySettings {
    /// Vendor property identifier.
    pub property_id: String,
}

impl PropertySettings {
    /// Builds settings for a property.
    #[must_use]
    pub fn new(property_id: impl Into<String>) -> Self {
        Self {
            property_id: property_id.into(),
        }
    }
}

/// Edit applied to a property version's hostname list.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostnameAction {
    /// Append the host, resolving its edge hostname id.
    Add,
    /// Drop the first host with the same `cnameFrom`.
    Remove,
}

/// Hostname entry as the vendor stores it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    /// Customer host name.
    pub cname_from: String,
    /// Edge hostname prefix the host points at.
    pub cname_to: String,
    /// Target kind, normally `EDGE_HOSTNAME`.
    pub cname_type: String,
    /// Vendor id of the edge hostname, filled in when adding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_hostname_id: Option<String>,
}

impl HostInfo {
    /// Builds an entry pointing `cname_from` at an edge hostname.
    #[must_use]
    pub fn edge_hostname(cname_from: impl Into<String>, cname_to: impl Into<String>) -> Self {
        Self {
            cname_from: cname_from.into(),
            cname_to: cname_to.into(),
            cname_type: String::from("EDGE_HOSTNAME"),
            edge_hostname_id: None,
        }
    }
}

/// What [`GetOrCreateVersion`] decided to do with the property versions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionPlan {
    /// Nothing is active, so the newest version is still editable.
    Reuse(i64),
    /// An active version exists; clone the newest one into `from + 1`.
    Bump {
        /// Version to clone.
        from: i64,
    },
}

impl VersionPlan {
    /// Chooses between reusing and bumping.
    ///
    /// A missing latest version counts as 0, missing production and staging
    /// versions as -1.
    #[must_use]
    pub fn choose(latest: Option<i64>, production: Option<i64>, staging: Option<i64>) -> Self {
        let production_version = production.unwrap_or(-1);
        let staging_version = staging.unwrap_or(-1);
        let max_version = latest
            .unwrap_or(0)
            .max(production_version)
            .max(staging_version);
        if production_version == -1 && staging_version == -1 {
            Self::Reuse(max_version)
        } else {
            Self::Bump { from: max_version }
        }
    }

    /// Version number the flow continues with.
    #[must_use]
    pub const fn version(self) -> i64 {
        match self {
            Self::Reuse(version) => version,
            Self::Bump { from } => from + 1,
        }
    }
}

/// Builds the three-step property update flow.
#[must_use]
pub fn update_property_flow(client: Arc<dyn PapiClient>, settings: &PropertySettings) -> Flow {
    Flow::new(format!("update-property-{}", settings.property_id))
        .then(GetOrCreateVersion::new(Arc::clone(&client), settings))
        .then(ApplyHostnameUpdate::new(Arc::clone(&client), settings))
        .then(Activate::new(client, settings))
}

/// Seeds a [`FlowStore`] with the inputs [`update_property_flow`] needs.
///
/// # Errors
///
/// Returns the serializer error if the inputs cannot be encoded.
pub fn property_update_inputs(
    updates: &[(HostnameAction, HostInfo)],
    notify_emails: &[String],
) -> Result<FlowStore, serde_json::Error> {
    Ok(FlowStore::new()
        .with(UPDATE_INFO_LIST, serde_json::to_value(updates)?)
        .with(NOTIFY_EMAILS, serde_json::to_value(notify_emails)?))
}

/// Finds or creates an editable property version.
pub struct GetOrCreateVersion {
    client: Arc<dyn PapiClient>,
    property_id: String,
}

impl GetOrCreateVersion {
    const NAME: &'static str = "get_or_create_version";

    /// Builds the step for a property.
    #[must_use]
    pub fn new(client: Arc<dyn PapiClient>, settings: &PropertySettings) -> Self {
        Self {
            client,
            property_id: settings.property_id.clone(),
        }
    }

    async fn run(&self) -> Result<Value, FlowError> {
        tracing::info!(property = %self.property_id, "looking up next property version");
        let path = format!("properties/{}", self.property_id);
        let body = expect_json(Self::NAME, self.client.get(&path).await, 200)?;
        let property = field(Self::NAME, &body, "/properties/items/0")?;
        let version_of = |name: &str| property.get(name).and_then(Value::as_i64);
        let plan = VersionPlan::choose(
            version_of("latestVersion"),
            version_of("productionVersion"),
            version_of("stagingVersion"),
        );

        if let VersionPlan::Bump { from } = plan {
            let version_path = format!("properties/{}/versions/{from}", self.property_id);
            let version = expect_json(Self::NAME, self.client.get(&version_path).await, 200)?;
            let etag = field(Self::NAME, &version, "/versions/items/0/etag")?.clone();
            let clone = json!({ "createFromVersion": from, "createFromEtag": etag });
            let versions_path = format!("properties/{}/versions", self.property_id);
            expect_status(Self::NAME, self.client.post(&versions_path, &clone).await, 201)?;
        }
        Ok(json!(plan.version()))
    }
}

impl FlowStep for GetOrCreateVersion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn provides(&self) -> &'static str {
        NEW_VERSION_NUMBER
    }

    fn execute<'a>(&'a mut self, _store: &'a FlowStore) -> FlowFuture<'a, Value> {
        Box::pin(self.run())
    }
}

/// Applies hostname edits to the selected version.
///
/// The version's hostnames and the account's edge hostnames are fetched at
/// most once per step instance.
pub struct ApplyHostnameUpdate {
    client: Arc<dyn PapiClient>,
    property_id: String,
    existing_hosts: Option<Vec<Value>>,
    edge_hostnames: Option<Vec<Value>>,
}

impl ApplyHostnameUpdate {
    const NAME: &'static str = "apply_hostname_update";

    /// Builds the step for a property.
    #[must_use]
    pub fn new(client: Arc<dyn PapiClient>, settings: &PropertySettings) -> Self {
        Self {
            client,
            property_id: settings.property_id.clone(),
            existing_hosts: None,
            edge_hostnames: None,
        }
    }

    async fn load_hosts(&mut self, hostnames_path: &str) -> Result<Vec<Value>, FlowError> {
        if let Some(hosts) = &self.existing_hosts {
            return Ok(hosts.clone());
        }
        tracing::info!(property = %self.property_id, "fetching property hostnames");
        let body = expect_json(Self::NAME, self.client.get(hostnames_path).await, 200)?;
        let hosts = items(Self::NAME, &body, "/hostnames/items")?;
        self.existing_hosts = Some(hosts.clone());
        Ok(hosts)
    }

    async fn edge_hostname_id(&mut self, cname_to: &str) -> Result<Option<String>, FlowError> {
        if self.edge_hostnames.is_none() {
            tracing::info!(property = %self.property_id, "fetching edge hostnames");
            let body = expect_json(Self::NAME, self.client.get("edgehostnames").await, 200)?;
            self.edge_hostnames = Some(items(Self::NAME, &body, "/edgeHostnames/items")?);
        }
        Ok(self
            .edge_hostnames
            .iter()
            .flatten()
            .filter(|edge| edge.get("domainPrefix").and_then(Value::as_str) == Some(cname_to))
            .filter_map(|edge| edge.get("edgeHostnameId"))
            .map(|id| id.as_str().map_or_else(|| id.to_string(), str::to_owned))
            .last())
    }

    async fn run(&mut self, store: &FlowStore) -> Result<Value, FlowError> {
        let version: i64 = store.require(Self::NAME, NEW_VERSION_NUMBER)?;
        let updates: Vec<(HostnameAction, HostInfo)> =
            store.require(Self::NAME, UPDATE_INFO_LIST)?;
        let hostnames_path = format!(
            "properties/{}/versions/{version}/hostnames",
            self.property_id
        );
        let mut hosts = self.load_hosts(&hostnames_path).await?;

        for (action, host) in updates {
            match action {
                HostnameAction::Add => {
                    let mut added = host;
                    if let Some(id) = self.edge_hostname_id(&added.cname_to).await? {
                        added.edge_hostname_id = Some(id);
                    }
                    hosts.push(to_value(Self::NAME, &added)?);
                }
                HostnameAction::Remove => {
                    let matches_host = |existing: &Value| {
                        existing.get("cnameFrom").and_then(Value::as_str)
                            == Some(host.cname_from.as_str())
                    };
                    if let Some(position) = hosts.iter().position(matches_host) {
                        hosts.remove(position);
                    }
                }
            }
        }

        tracing::info!(
            property = %self.property_id,
            version,
            hosts = hosts.len(),
            "updating property hostnames"
        );
        let payload = Value::Array(hosts.clone());
        expect_status(Self::NAME, self.client.put(&hostnames_path, &payload).await, 200)?;
        self.existing_hosts = Some(hosts);
        Ok(payload)
    }
}

impl FlowStep for ApplyHostnameUpdate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &[NEW_VERSION_NUMBER, UPDATE_INFO_LIST]
    }

    fn provides(&self) -> &'static str {
        HOSTNAMES
    }

    fn execute<'a>(&'a mut self, store: &'a FlowStore) -> FlowFuture<'a, Value> {
        Box::pin(self.run(store))
    }
}

/// Activates the edited version on the staging network.
///
/// The vendor answers `400` listing warnings that must be acknowledged; the
/// step resubmits once with every warning acknowledged.
pub struct Activate {
    client: Arc<dyn PapiClient>,
    property_id: String,
}

impl Activate {
    const NAME: &'static str = "activate";

    /// Builds the step for a property.
    #[must_use]
    pub fn new(client: Arc<dyn PapiClient>, settings: &PropertySettings) -> Self {
        Self {
            client,
            property_id: settings.property_id.clone(),
        }
    }

    async fn run(&self, store: &FlowStore) -> Result<Value, FlowError> {
        let version: i64 = store.require(Self::NAME, NEW_VERSION_NUMBER)?;
        let notify_emails: Vec<String> = store.require(Self::NAME, NOTIFY_EMAILS)?;
        let path = format!("properties/{}/activations", self.property_id);
        let mut request = json!({
            "propertyVersion": version,
            "network": ACTIVATION_NETWORK,
            "note": format!("Updating configuration for property {}", self.property_id),
            "notifyEmails": notify_emails,
        });

        tracing::info!(property = %self.property_id, version, "activating property version");
        let first = transport(Self::NAME, self.client.post(&path, &request).await)?;
        let accepted = if first.status == 400 {
            let warnings = parse(Self::NAME, &first)?
                .get("warnings")
                .and_then(Value::as_array)
                .map(|warnings| {
                    warnings
                        .iter()
                        .filter_map(|warning| warning.get("messageId").cloned())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            tracing::info!(
                property = %self.property_id,
                warnings = warnings.len(),
                "acknowledging activation warnings"
            );
            if let Value::Object(fields) = &mut request {
                fields.insert(String::from("acknowledgeWarnings"), Value::Array(warnings));
            }
            expect_status(Self::NAME, self.client.post(&path, &request).await, 201)?
        } else {
            require_status(Self::NAME, first, 201)?
        };

        let body = parse(Self::NAME, &accepted)?;
        Ok(field(Self::NAME, &body, "/activationLink")?.clone())
    }
}

impl FlowStep for Activate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &[NEW_VERSION_NUMBER, NOTIFY_EMAILS]
    }

    fn provides(&self) -> &'static str {
        ACTIVATION_LINK
    }

    fn execute<'a>(&'a mut self, store: &'a FlowStore) -> FlowFuture<'a, Value> {
        Box::pin(self.run(store))
    }
}

fn transport(
    step: &str,
    response: Result<PapiResponse, PapiError>,
) -> Result<PapiResponse, FlowError> {
    response.map_err(|source| FlowError::Transport {
        step: step.to_owned(),
        source,
    })
}

fn require_status(
    step: &str,
    response: PapiResponse,
    expected: u16,
) -> Result<PapiResponse, FlowError> {
    if response.status == expected {
        Ok(response)
    } else {
        Err(FlowError::VendorApi {
            step: step.to_owned(),
            status: response.status,
            body: response.body,
        })
    }
}

fn expect_status(
    step: &str,
    response: Result<PapiResponse, PapiError>,
    expected: u16,
) -> Result<PapiResponse, FlowError> {
    require_status(step, transport(step, response)?, expected)
}

fn expect_json(
    step: &str,
    response: Result<PapiResponse, PapiError>,
    expected: u16,
) -> Result<Value, FlowError> {
    parse(step, &expect_status(step, response, expected)?)
}

fn parse(step: &str, response: &PapiResponse) -> Result<Value, FlowError> {
    response.parse().map_err(|err| FlowError::InvalidResponse {
        step: step.to_owned(),
        message: format!("body is not JSON: {err}"),
    })
}

fn field<'v>(step: &str, body: &'v Value, pointer: &str) -> Result<&'v Value, FlowError> {
    body.pointer(pointer)
        .ok_or_else(|| FlowError::InvalidResponse {
            step: step.to_owned(),
            message: format!("missing {pointer}"),
        })
}

fn items(step: &str, body: &Value, pointer: &str) -> Result<Vec<Value>, FlowError> {
    field(step, body, pointer)?
        .as_array()
        .cloned()
        .ok_or_else(|| FlowError::InvalidResponse {
            step: step.to_owned(),
            message: format!("{pointer} is not a list"),
        })
}

fn to_value(step: &str, host: &HostInfo) -> Result<Value, FlowError> {
    serde_json::to_value(host).map_err(|err| FlowError::InvalidInput {
        step: step.to_owned(),
        input: UPDATE_INFO_LIST.to_owned(),
        message: err.to_string(),
    })
}
