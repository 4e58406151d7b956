//! Ordered, compensating step pipelines for long-running provider work.
//!
//! A [`Flow`] runs its [`FlowStep`]s one after another against a shared
//! [`FlowStore`] of named JSON values. Each step declares the names it reads
//! and the single name it binds its result to. When a step fails, the steps
//! that already completed have their `revert` hook called in reverse order
//! before the error is returned.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub mod mod_san;
pub mod papi;
pub mod property;

pub use mod_san::{ModSanReport, ModSanWorker, WorkerError};
pub use papi::{PapiClient, PapiError, PapiResponse, ReqwestPapiClient};
pub use property::{HostInfo, HostnameAction, PropertySettings, update_property_flow};

/// Future returned by [`FlowStep::execute`].
pub type FlowFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FlowError>> + Send + 'a>>;

/// Errors raised while running a flow.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FlowError {
    /// Raised when a step's declared input is absent from the store.
    #[error("step {step} requires input {input}, which no earlier step provided")]
    MissingInput {
        /// Step that could not start.
        step: String,
        /// Missing binding.
        input: String,
    },
    /// Raised when a binding exists but does not have the expected shape.
    #[error("step {step} could not decode input {input}: {message}")]
    InvalidInput {
        /// Step reading the binding.
        step: String,
        /// Offending binding.
        input: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when the vendor answers with an unexpected status.
    #[error("vendor API returned {status} during {step}: {body}")]
    VendorApi {
        /// Step issuing the request.
        step: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Raised when a vendor response lacks a field the step needs.
    #[error("unexpected vendor response during {step}: {message}")]
    InvalidResponse {
        /// Step reading the response.
        step: String,
        /// Description of the problem.
        message: String,
    },
    /// Raised when the vendor cannot be reached.
    #[error("vendor transport failure during {step}: {source}")]
    Transport {
        /// Step issuing the request.
        step: String,
        /// Underlying client error.
        #[source]
        source: PapiError,
    },
}

/// Named JSON values shared by the steps of one flow run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlowStore {
    values: BTreeMap<String, Value>,
}

impl FlowStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Binds `value` to `name`, replacing any earlier binding.
    #[must_use]
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Binds `value` to `name`, replacing any earlier binding.
    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_owned(), value);
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Reports whether `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Decodes the value bound to `name` on behalf of `step`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingInput`] when nothing is bound to `name`
    /// and [`FlowError::InvalidInput`] when the value has the wrong shape.
    pub fn require<T: DeserializeOwned>(&self, step: &str, name: &str) -> Result<T, FlowError> {
        let value = self.get(name).ok_or_else(|| FlowError::MissingInput {
            step: step.to_owned(),
            input: name.to_owned(),
        })?;
        T::deserialize(value).map_err(|err| FlowError::InvalidInput {
            step: step.to_owned(),
            input: name.to_owned(),
            message: err.to_string(),
        })
    }
}

/// One unit of work in a [`Flow`].
pub trait FlowStep: Send {
    /// Step name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Bindings that must exist before the step runs.
    fn requires(&self) -> &'static [&'static str];

    /// Binding the step's result is stored under.
    fn provides(&self) -> &'static str;

    /// Runs the step and returns the value to bind to [`FlowStep::provides`].
    fn execute<'a>(&'a mut self, store: &'a FlowStore) -> FlowFuture<'a, Value>;

    /// Compensation hook called when a later step fails.
    ///
    /// Vendor side effects are not undone; the default records that the step
    /// was rolled back.
    fn revert(&mut self, store: &FlowStore) {
        tracing::info!(
            step = self.name(),
            bound = store.contains(self.provides()),
            "reverting flow step"
        );
    }
}

/// Ordered list of steps run sequentially with compensation on failure.
pub struct Flow {
    name: String,
    steps: Vec<Box<dyn FlowStep>>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Flow")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|step| step.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Flow {
    /// Creates an empty flow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn then(mut self, step: impl FlowStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Flow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs every step in order, returning the store with all bindings.
    ///
    /// # Errors
    ///
    /// Returns the failing step's [`FlowError`] after reverting the steps
    /// that already completed, most recent first.
    pub async fn run(&mut self, mut store: FlowStore) -> Result<FlowStore, FlowError> {
        let mut completed = 0;
        let mut failure = None;
        for step in &mut self.steps {
            match run_step(step.as_mut(), &store).await {
                Ok(value) => {
                    store.insert(step.provides(), value);
                    completed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        flow = %self.name,
                        step = step.name(),
                        error = %err,
                        "flow step failed"
                    );
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            for done in self.steps.iter_mut().take(completed).rev() {
                done.revert(&store);
            }
            return Err(err);
        }
        tracing::info!(flow = %self.name, steps = completed, "flow completed");
        Ok(store)
    }
}

async fn run_step(step: &mut dyn FlowStep, store: &FlowStore) -> Result<Value, FlowError> {
    if let Some(input) = step.requires().iter().find(|input| !store.contains(input)) {
        return Err(FlowError::MissingInput {
            step: step.name().to_owned(),
            input: (*input).to_owned(),
        });
    }
    tracing::info!(step = step.name(), "running flow step");
    step.execute(store).await
}
