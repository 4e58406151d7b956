//! Single-flight consumer of the mod-san queue.
//!
//! Adding a domain to the shared SAN certificate edits one vendor property,
//! so requests are funnelled through the durable queue and applied one at a
//! time by whichever worker dequeues them.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::property::{self, ACTIVATION_LINK, HostInfo, HostnameAction, NEW_VERSION_NUMBER};
use super::{FlowError, PapiClient, PropertySettings};
use crate::model::ModSanRequest;
use crate::queue::{ModSanQueue, QueueError};

/// Errors raised while processing a queued request.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Raised when the queue cannot be read.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Raised when a dequeued payload is not a request. The entry has
    /// already been removed.
    #[error("dequeued payload is not a mod-san request: {0}")]
    Decode(#[source] serde_json::Error),
    /// Raised when the property update flow fails.
    #[error("property update for {domain} failed: {source}")]
    Flow {
        /// Domain being added.
        domain: String,
        /// Flow failure.
        #[source]
        source: FlowError,
    },
}

/// Result of applying one queued request.
#[derive(Clone, Debug, PartialEq)]
pub struct ModSanReport {
    /// Request that was applied.
    pub request: ModSanRequest,
    /// Property version that was edited and activated.
    pub version: i64,
    /// Activation link returned by the vendor.
    pub activation_link: Value,
}

/// Dequeues SAN requests and runs the property update flow for each.
#[derive(Clone)]
pub struct ModSanWorker {
    queue: ModSanQueue,
    client: Arc<dyn PapiClient>,
    settings: PropertySettings,
    san_cert_hostname: String,
    notify_emails: Vec<String>,
}

impl std::fmt::Debug for ModSanWorker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ModSanWorker")
            .field("queue", &self.queue)
            .field("settings", &self.settings)
            .field("san_cert_hostname", &self.san_cert_hostname)
            .finish_non_exhaustive()
    }
}

impl ModSanWorker {
    /// Builds a worker for the SAN certificate edge hostname.
    #[must_use]
    pub fn new(
        queue: ModSanQueue,
        client: Arc<dyn PapiClient>,
        settings: PropertySettings,
        san_cert_hostname: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            client,
            settings,
            san_cert_hostname: san_cert_hostname.into(),
            notify_emails: Vec::new(),
        }
    }

    /// Sets the addresses notified about activations.
    #[must_use]
    pub fn with_notify_emails(mut self, notify_emails: Vec<String>) -> Self {
        self.notify_emails = notify_emails;
        self
    }

    /// Takes the next request and applies it.
    ///
    /// Returns `None` when `block` is false and the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the queue fails, the payload cannot be
    /// decoded, or the property update flow fails. The request is not
    /// requeued.
    pub async fn process_next(&self, block: bool) -> Result<Option<ModSanReport>, WorkerError> {
        let Some(payload) = self.queue.dequeue(block).await? else {
            return Ok(None);
        };
        let request = ModSanRequest::from_payload(&payload).map_err(|err| {
            tracing::error!(error = %err, "discarding undecodable mod-san payload");
            WorkerError::Decode(err)
        })?;
        self.apply(request).await.map(Some)
    }

    /// Adds the request's domain to the property behind the SAN certificate.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Flow`] when any step fails.
    pub async fn apply(&self, request: ModSanRequest) -> Result<ModSanReport, WorkerError> {
        let flow_error = |source: FlowError| WorkerError::Flow {
            domain: request.domain_name.clone(),
            source,
        };
        tracing::info!(
            domain = %request.domain_name,
            flavor = %request.flavor_id,
            property = %self.settings.property_id,
            validate_service = ?request.validate_service,
            "applying mod-san request"
        );

        let updates = [(
            HostnameAction::Add,
            HostInfo::edge_hostname(&request.domain_name, &self.san_cert_hostname),
        )];
        let inputs = property::property_update_inputs(&updates, &self.notify_emails).map_err(
            |err| {
                flow_error(FlowError::InvalidInput {
                    step: String::from("prepare"),
                    input: property::UPDATE_INFO_LIST.to_owned(),
                    message: err.to_string(),
                })
            },
        )?;
        let mut flow = property::update_property_flow(Arc::clone(&self.client), &self.settings);
        let store = flow.run(inputs).await.map_err(flow_error)?;

        let version: i64 = store
            .require("report", NEW_VERSION_NUMBER)
            .map_err(flow_error)?;
        let activation_link = store
            .get(ACTIVATION_LINK)
            .cloned()
            .unwrap_or(Value::Null);
        tracing::info!(domain = %request.domain_name, version, "mod-san request applied");
        Ok(ModSanReport {
            request,
            version,
            activation_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FsCoordinationBackend;
    use crate::test_support::ScriptedPapiClient;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use serde_json::json;
    use tempfile::TempDir;

    fn worker(dir: &TempDir, client: &ScriptedPapiClient) -> (ModSanQueue, ModSanWorker) {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("queue")).expect("UTF-8 path");
        let queue = ModSanQueue::new(Arc::new(
            FsCoordinationBackend::open(&path).expect("open queue"),
        ));
        let worker = ModSanWorker::new(
            queue.clone(),
            client.shared(),
            PropertySettings::new("prp_san"),
            "secure.san1.example.com",
        )
        .with_notify_emails(vec![String::from("ops@example.com")]);
        (queue, worker)
    }

    #[rstest]
    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let client = ScriptedPapiClient::new();
        let (_, worker) = worker(&dir, &client);

        assert!(worker.process_next(false).await.expect("process").is_none());
        assert!(client.requests().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn queued_domain_is_added_to_the_san_property() {
        let dir = TempDir::new().expect("temp dir");
        let client = ScriptedPapiClient::new();
        let (queue, worker) = worker(&dir, &client);
        let request = ModSanRequest::san("www.abc.com", "premium");
        queue
            .enqueue(&request.to_payload().expect("encode"))
            .expect("enqueue");
        client.push_json(
            200,
            &json!({ "properties": { "items": [{ "latestVersion": 3 }] } }),
        );
        client.push_json(200, &json!({ "hostnames": { "items": [] } }));
        client.push_json(
            200,
            &json!({ "edgeHostnames": { "items": [
                { "domainPrefix": "secure.san1.example.com", "edgeHostnameId": "ehn_9" }
            ]}}),
        );
        client.push_json(200, &json!({}));
        client.push_json(201, &json!({ "activationLink": "atv" }));

        let report = worker
            .process_next(false)
            .await
            .expect("process")
            .expect("a request was queued");

        assert_eq!(report.request, request);
        assert_eq!(report.version, 3);
        assert_eq!(report.activation_link, json!("atv"));
        let put = client
            .requests()
            .into_iter()
            .find(|call| call.method == "PUT")
            .expect("hostnames written");
        assert_eq!(
            put.body,
            Some(json!([{
                "cnameFrom": "www.abc.com",
                "cnameTo": "secure.san1.example.com",
                "cnameType": "EDGE_HOSTNAME",
                "edgeHostnameId": "ehn_9",
            }]))
        );
        assert!(queue.is_empty().expect("is_empty"));
    }

    #[rstest]
    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let dir = TempDir::new().expect("temp dir");
        let client = ScriptedPapiClient::new();
        let (queue, worker) = worker(&dir, &client);
        queue.enqueue(b"not json").expect("enqueue");

        let err = worker.process_next(false).await.expect_err("should fail");

        assert!(matches!(err, WorkerError::Decode(_)));
        assert!(queue.is_empty().expect("is_empty"));
    }
}
