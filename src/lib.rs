//! Core library for the Edgeward CDN orchestration service.
//!
//! The crate provisions tenant delivery services across several CDN
//! providers at once. [`orchestrator::ServiceOrchestrator`] fans every
//! lifecycle call out through the [`provider::ProviderRegistry`], records
//! each provider's result independently, and deletes in two phases on a
//! background task. Long-running vendor work runs as compensating
//! [`flow::Flow`] pipelines fed by the durable [`queue::ModSanQueue`].

pub mod admin;
pub mod config;
pub mod flow;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod storage;
pub mod test_support;

pub use admin::{AdminResponse, AdminRouter, Method};
pub use config::{ConfigError, EdgewardConfig};
pub use flow::{Flow, FlowError, FlowStep, FlowStore};
pub use model::{
    AccessUrl, CachingRule, Domain, Flavor, ModSanRequest, Origin, ProviderDetail,
    ProviderDetailError, ProviderStatus, ServiceRecord, ServiceSpec, ServiceStatus,
};
pub use orchestrator::{DeleteOutcome, DeleteTicket, OrchestratorError, ServiceOrchestrator};
pub use provider::{ProviderAdapter, ProviderError, ProviderOutcome, ProviderRegistry};
pub use queue::{CoordinationBackend, FsCoordinationBackend, ModSanQueue, QueueError};
pub use storage::{FlavorStore, MemoryFlavorStore, MemoryServiceStore, ServiceStore, StoreError};
