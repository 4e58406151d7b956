//! Operator endpoints exposed through an explicit dispatch table.
//!
//! The router is transport agnostic: a front end hands it a method, a path
//! relative to the admin root, and the raw body, and gets a status and an
//! optional JSON body back.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::ModSanRequest;
use crate::orchestrator::{OperatorState, OrchestratorError, ServiceOrchestrator};
use crate::queue::ModSanQueue;

/// Path of the SAN certificate retry list.
pub const RETRY_LIST_PATH: &str = "provider/akamai/ssl_certificate/retry_list";
/// Path of the operator service state override.
pub const SERVICE_STATE_PATH: &str = "services/state";

/// HTTP verbs understood by the router.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Method {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
}

/// Status and optional JSON body returned to the front end.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdminResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, if any.
    pub body: Option<Value>,
}

impl AdminResponse {
    const fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    const fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "message": message }))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    GetRetryList,
    PutRetryList,
    UpdateServiceState,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryEntry {
    #[serde(default)]
    project_id: Option<String>,
    domain_name: String,
    flavor_id: String,
    #[serde(default)]
    validate_service: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceStateRequest {
    project_id: String,
    service_id: String,
    state: OperatorState,
}

/// Routes operator requests to the orchestrator and the mod-san queue.
#[derive(Debug)]
pub struct AdminRouter {
    routes: BTreeMap<&'static str, BTreeMap<Method, Action>>,
    orchestrator: ServiceOrchestrator,
    queue: ModSanQueue,
}

impl AdminRouter {
    /// Builds the dispatch table.
    #[must_use]
    pub fn new(orchestrator: ServiceOrchestrator, queue: ModSanQueue) -> Self {
        let routes = BTreeMap::from([
            (
                RETRY_LIST_PATH,
                BTreeMap::from([
                    (Method::Get, Action::GetRetryList),
                    (Method::Put, Action::PutRetryList),
                ]),
            ),
            (
                SERVICE_STATE_PATH,
                BTreeMap::from([(Method::Post, Action::UpdateServiceState)]),
            ),
        ]);
        Self {
            routes,
            orchestrator,
            queue,
        }
    }

    /// Dispatches one request.
    #[must_use]
    pub fn handle(&self, method: Method, path: &str, body: &[u8]) -> AdminResponse {
        let Some(methods) = self.routes.get(path.trim_matches('/')) else {
            return AdminResponse::error(404, "no such admin resource");
        };
        let Some(action) = methods.get(&method) else {
            return AdminResponse::error(405, "method not allowed");
        };
        tracing::debug!(path = %path, method = ?method, "admin request");
        match action {
            Action::GetRetryList => self.get_retry_list(),
            Action::PutRetryList => self.put_retry_list(body),
            Action::UpdateServiceState => self.update_service_state(body),
        }
    }

    fn get_retry_list(&self) -> AdminResponse {
        let payloads = match self.queue.traverse() {
            Ok(payloads) => payloads,
            Err(err) => return AdminResponse::error(503, &err.to_string()),
        };
        let entries: Vec<Value> = payloads
            .iter()
            .filter_map(|payload| match ModSanRequest::from_payload(payload) {
                Ok(request) => serde_json::to_value(request).ok(),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable retry list entry");
                    None
                }
            })
            .collect();
        AdminResponse::json(200, Value::Array(entries))
    }

    fn put_retry_list(&self, body: &[u8]) -> AdminResponse {
        let entries: Vec<RetryEntry> = match serde_json::from_slice(body) {
            Ok(entries) => entries,
            Err(err) => return AdminResponse::error(400, &err.to_string()),
        };
        if entries
            .iter()
            .any(|entry| entry.domain_name.trim().is_empty() || entry.flavor_id.trim().is_empty())
        {
            return AdminResponse::error(400, "domain_name and flavor_id must not be empty");
        }

        let mut payloads = Vec::with_capacity(entries.len());
        for entry in entries {
            tracing::info!(
                project = ?entry.project_id,
                domain = %entry.domain_name,
                "requeueing SAN request"
            );
            let mut request = ModSanRequest::san(entry.domain_name, entry.flavor_id);
            request.validate_service = entry.validate_service;
            match request.to_payload() {
                Ok(payload) => payloads.push(payload),
                Err(err) => return AdminResponse::error(400, &err.to_string()),
            }
        }
        for payload in &payloads {
            if let Err(err) = self.queue.enqueue(payload) {
                return AdminResponse::error(503, &err.to_string());
            }
        }
        AdminResponse::json(200, json!({ "queued": payloads.len() }))
    }

    fn update_service_state(&self, body: &[u8]) -> AdminResponse {
        let request: ServiceStateRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => return AdminResponse::error(400, &err.to_string()),
        };
        match self
            .orchestrator
            .update_state(&request.project_id, &request.service_id, request.state)
        {
            Ok(_) => AdminResponse::empty(202),
            Err(err @ OrchestratorError::NotFound { .. }) => {
                AdminResponse::error(404, &err.to_string())
            }
            Err(err) => AdminResponse::error(500, &err.to_string()),
        }
    }
}
