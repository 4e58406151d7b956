//! Shared fixtures for orchestrator BDD scenarios.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use edgeward::model::{Domain, Flavor, Origin, ProviderRef, ProviderStatus, ServiceSpec};
use edgeward::orchestrator::{DeleteOutcome, OrchestratorError, Outcomes};
use edgeward::storage::{MemoryFlavorStore, MemoryServiceStore, ServiceStore};
use edgeward::test_support::ScriptedProvider;
use edgeward::{ProviderRegistry, ServiceOrchestrator};
use rstest::fixture;

pub const TENANT: &str = "project-1";

/// Everything a scenario observed, shared across the context clones handed
/// to each step.
#[derive(Debug, Default)]
pub struct Observed {
    pub outcomes: Option<Outcomes>,
    pub statuses_before_worker: Option<BTreeMap<String, ProviderStatus>>,
    pub delete_outcome: Option<DeleteOutcome>,
    pub error: Option<OrchestratorError>,
}

#[derive(Clone)]
pub struct OrchestratorContext {
    pub store: Arc<MemoryServiceStore>,
    pub providers: BTreeMap<String, ScriptedProvider>,
    pub orchestrator: Option<ServiceOrchestrator>,
    pub observed: Arc<Mutex<Observed>>,
}

impl OrchestratorContext {
    pub fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn provider(&self, key: &str) -> &ScriptedProvider {
        self.providers
            .get(key)
            .unwrap_or_else(|| panic!("provider {key} should be registered"))
    }

    pub fn orchestrator(&self) -> &ServiceOrchestrator {
        self.orchestrator
            .as_ref()
            .unwrap_or_else(|| panic!("scenario should build the orchestrator first"))
    }

    /// Registers scripted providers and builds the orchestrator around them.
    pub fn with_providers(mut self, keys: &[&str]) -> Self {
        let mut registry = ProviderRegistry::new();
        for key in keys {
            let provider = ScriptedProvider::new(&capitalise(key));
            registry = registry.with_provider(key, provider.shared());
            self.providers.insert((*key).to_owned(), provider);
        }
        let services: Arc<dyn ServiceStore> = self.store.clone();
        self.orchestrator = Some(ServiceOrchestrator::new(
            services,
            Arc::new(flavors()),
            registry,
        ));
        self
    }

    pub fn statuses(&self, service: &str) -> BTreeMap<String, ProviderStatus> {
        self.store
            .get_provider_details(TENANT, service)
            .unwrap_or_else(|err| panic!("details for {service}: {err}"))
            .into_iter()
            .map(|(provider, detail)| (provider, detail.status()))
            .collect()
    }
}

#[fixture]
pub fn orchestrator_context() -> OrchestratorContext {
    OrchestratorContext {
        store: Arc::new(MemoryServiceStore::new()),
        providers: BTreeMap::new(),
        orchestrator: None,
        observed: Arc::new(Mutex::new(Observed::default())),
    }
}

pub fn spec(name: &str, flavor_id: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_owned(),
        domains: vec![Domain::http("www.example.com")],
        origins: vec![Origin::new("origin.example.com")],
        caching: Vec::new(),
        flavor_id: flavor_id.to_owned(),
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("test runtime should build: {err}"))
}

fn flavors() -> MemoryFlavorStore {
    MemoryFlavorStore::new([
        flavor("standard", &["akamai", "fastly"]),
        flavor("mixed", &["akamai", "fastly", "maxcdn"]),
    ])
}

fn flavor(id: &str, providers: &[&str]) -> Flavor {
    Flavor {
        id: id.to_owned(),
        providers: providers
            .iter()
            .map(|provider| ProviderRef {
                provider_id: (*provider).to_owned(),
                label: capitalise(provider),
            })
            .collect(),
    }
}

fn capitalise(key: &str) -> String {
    let mut chars = key.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
