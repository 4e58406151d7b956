//! Test doubles shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::flow::papi::PapiFuture;
use crate::flow::{PapiClient, PapiError, PapiResponse};
use crate::model::{AccessUrl, ProviderStatus, ServiceSpec};
use crate::provider::{
    ProviderAdapter, ProviderError, ProviderFuture, ProviderOutcome, ProviderSuccess,
};

/// Behaviour of one [`ScriptedProvider`] operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptedBehaviour {
    /// Return a success outcome.
    Succeed,
    /// Return a success outcome carrying a vendor status.
    SucceedWithStatus(ProviderStatus),
    /// Return a failure outcome with the given detail.
    Fail(String),
    /// Return an adapter error.
    Error(ProviderError),
    /// Never complete, so the registry timeout fires.
    Hang,
}

/// Records a single call made to a [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderInvocation {
    /// Operation name (`create`, `update`, `delete`, `purge`).
    pub operation: &'static str,
    /// Vendor id passed to the call, if any.
    pub provider_service_id: Option<String>,
}

#[derive(Debug)]
struct ScriptedProviderState {
    create: ScriptedBehaviour,
    update: ScriptedBehaviour,
    delete: ScriptedBehaviour,
    purge: ScriptedBehaviour,
    alive: bool,
    invocations: Vec<ProviderInvocation>,
}

/// Provider adapter double whose outcomes are set per operation.
///
/// Every operation succeeds until told otherwise. Successful creates report
/// the id `<name>-id` and one access URL.
#[derive(Clone, Debug)]
pub struct ScriptedProvider {
    name: String,
    state: Arc<StdMutex<ScriptedProviderState>>,
}

impl ScriptedProvider {
    /// Creates a provider reporting the given vendor label.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Arc::new(StdMutex::new(ScriptedProviderState {
                create: ScriptedBehaviour::Succeed,
                update: ScriptedBehaviour::Succeed,
                delete: ScriptedBehaviour::Succeed,
                purge: ScriptedBehaviour::Succeed,
                alive: true,
                invocations: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> StdMutexGuard<'_, ScriptedProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wraps the provider for registration.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ProviderAdapter> {
        Arc::new(self.clone())
    }

    /// Sets the behaviour of `create`.
    pub fn on_create(&self, behaviour: ScriptedBehaviour) {
        self.lock().create = behaviour;
    }

    /// Sets the behaviour of `update`.
    pub fn on_update(&self, behaviour: ScriptedBehaviour) {
        self.lock().update = behaviour;
    }

    /// Sets the behaviour of `delete`.
    pub fn on_delete(&self, behaviour: ScriptedBehaviour) {
        self.lock().delete = behaviour;
    }

    /// Sets the behaviour of `purge`.
    pub fn on_purge(&self, behaviour: ScriptedBehaviour) {
        self.lock().purge = behaviour;
    }

    /// Sets the liveness reported by `is_alive`.
    pub fn set_alive(&self, alive: bool) {
        self.lock().alive = alive;
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<ProviderInvocation> {
        self.lock().invocations.clone()
    }

    /// Number of calls recorded for `operation`.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    fn record(
        &self,
        operation: &'static str,
        provider_service_id: Option<&str>,
    ) -> ScriptedBehaviour {
        let mut state = self.lock();
        state.invocations.push(ProviderInvocation {
            operation,
            provider_service_id: provider_service_id.map(str::to_owned),
        });
        match operation {
            "create" => state.create.clone(),
            "update" => state.update.clone(),
            "delete" => state.delete.clone(),
            _ => state.purge.clone(),
        }
    }

    fn respond(
        &self,
        operation: &'static str,
        provider_service_id: Option<&str>,
    ) -> ProviderFuture<'_, ProviderOutcome> {
        let behaviour = self.record(operation, provider_service_id);
        let id = provider_service_id.map_or_else(|| format!("{}-id", self.name), str::to_owned);
        let href = format!("{}.cdn.example.net", self.name.to_ascii_lowercase());
        Box::pin(async move {
            let success = ProviderSuccess {
                id,
                links: vec![AccessUrl::new(href, "access_url")],
                status: None,
            };
            match behaviour {
                ScriptedBehaviour::Succeed => Ok(ProviderOutcome::Success(success)),
                ScriptedBehaviour::SucceedWithStatus(status) => {
                    Ok(ProviderOutcome::Success(success.with_status(status)))
                }
                ScriptedBehaviour::Fail(detail) => Ok(ProviderOutcome::failure(
                    format!("{operation} failed"),
                    detail,
                )),
                ScriptedBehaviour::Error(err) => Err(err),
                ScriptedBehaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Transport {
                        provider: String::from("scripted"),
                        message: String::from("hung call resumed"),
                    })
                }
            }
        })
    }
}

impl ProviderAdapter for ScriptedProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn create<'a>(&'a self, _spec: &'a ServiceSpec) -> ProviderFuture<'a, ProviderOutcome> {
        self.respond("create", None)
    }

    fn update<'a>(
        &'a self,
        provider_service_id: &'a str,
        _spec: &'a ServiceSpec,
    ) -> ProviderFuture<'a, ProviderOutcome> {
        self.respond("update", Some(provider_service_id))
    }

    fn delete<'a>(&'a self, provider_service_id: &'a str) -> ProviderFuture<'a, ProviderOutcome> {
        self.respond("delete", Some(provider_service_id))
    }

    fn purge<'a>(
        &'a self,
        provider_service_id: &'a str,
        _url: Option<&'a str>,
    ) -> ProviderFuture<'a, ProviderOutcome> {
        self.respond("purge", Some(provider_service_id))
    }

    fn is_alive(&self) -> ProviderFuture<'_, bool> {
        let alive = self.lock().alive;
        Box::pin(async move { Ok(alive) })
    }
}

/// Records a single request made through [`ScriptedPapiClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct PapiRequest {
    /// HTTP verb.
    pub method: &'static str,
    /// Path relative to the API root.
    pub path: String,
    /// JSON body for `POST` and `PUT`.
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct PapiScript {
    responses: VecDeque<PapiResponse>,
    requests: Vec<PapiRequest>,
}

/// Vendor API double that returns pre-seeded responses in FIFO order.
///
/// A request with nothing left to answer it fails with a transport error.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPapiClient {
    script: Arc<StdMutex<PapiScript>>,
}

impl ScriptedPapiClient {
    /// Creates a client with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StdMutexGuard<'_, PapiScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wraps the client for injection into flows.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn PapiClient> {
        Arc::new(self.clone())
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: &Value) {
        self.lock()
            .responses
            .push_back(PapiResponse::json(status, body));
    }

    /// Queues a raw response.
    pub fn push_raw(&self, status: u16, body: &str) {
        self.lock().responses.push_back(PapiResponse {
            status,
            body: body.to_owned(),
        });
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<PapiRequest> {
        self.lock().requests.clone()
    }

    /// Number of responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().responses.len()
    }

    fn answer(&self, method: &'static str, path: &str, body: Option<&Value>) -> PapiFuture<'_> {
        let mut script = self.lock();
        script.requests.push(PapiRequest {
            method,
            path: path.to_owned(),
            body: body.cloned(),
        });
        let response = script.responses.pop_front().ok_or_else(|| PapiError::Transport {
            url: path.to_owned(),
            message: String::from("no scripted response available"),
        });
        Box::pin(async move { response })
    }
}

impl PapiClient for ScriptedPapiClient {
    fn get<'a>(&'a self, path: &'a str) -> PapiFuture<'a> {
        self.answer("GET", path, None)
    }

    fn post<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a> {
        self.answer("POST", path, Some(body))
    }

    fn put<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a> {
        self.answer("PUT", path, Some(body))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or removes (`None`) environment variables while holding
    /// a global mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
