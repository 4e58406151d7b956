//! BDD step definitions for service orchestration.

use edgeward::model::{DeleteAttemptOutcome, ProviderStatus, ServiceStatus};
use edgeward::orchestrator::DeleteOutcome;
use edgeward::test_support::ScriptedBehaviour;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{OrchestratorContext, TENANT, runtime, spec};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_status(value: &str) -> Result<ProviderStatus, StepError> {
    ProviderStatus::parse(value.trim())
        .ok_or_else(|| StepError::Assertion(format!("unknown provider status {value}")))
}

fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect()
}

#[given("an orchestrator with providers \"{first}\" and \"{second}\"")]
fn orchestrator_with_providers(
    orchestrator_context: OrchestratorContext,
    first: String,
    second: String,
) -> OrchestratorContext {
    orchestrator_context.with_providers(&[first.trim(), second.trim()])
}

#[given("provider \"{key}\" rejects creates with \"{detail}\"")]
fn provider_rejects_creates(
    orchestrator_context: OrchestratorContext,
    key: String,
    detail: String,
) -> OrchestratorContext {
    orchestrator_context
        .provider(key.trim())
        .on_create(ScriptedBehaviour::Fail(detail));
    orchestrator_context
}

#[given("provider \"{key}\" rejects deletes with \"{detail}\"")]
fn provider_rejects_deletes(
    orchestrator_context: OrchestratorContext,
    key: String,
    detail: String,
) -> OrchestratorContext {
    orchestrator_context
        .provider(key.trim())
        .on_delete(ScriptedBehaviour::Fail(detail));
    orchestrator_context
}

#[given("service \"{name}\" exists")]
fn service_exists(orchestrator_context: OrchestratorContext, name: String) -> OrchestratorContext {
    let orchestrator = orchestrator_context.orchestrator().clone();
    runtime()
        .block_on(async move { orchestrator.create(TENANT, spec(name.trim(), "standard")).await })
        .unwrap_or_else(|err| panic!("setup create should succeed: {err}"));
    orchestrator_context
}

#[when("the tenant creates service \"{name}\" with flavor \"{flavor}\"")]
fn create_service(
    orchestrator_context: OrchestratorContext,
    name: String,
    flavor: String,
) -> OrchestratorContext {
    let orchestrator = orchestrator_context.orchestrator().clone();
    let result = runtime().block_on(async move {
        orchestrator
            .create(TENANT, spec(name.trim(), flavor.trim()))
            .await
    });
    {
        let mut observed = orchestrator_context.observed();
        match result {
            Ok(outcomes) => observed.outcomes = Some(outcomes),
            Err(err) => observed.error = Some(err),
        }
    }
    orchestrator_context
}

#[when("the tenant deletes service \"{name}\" and the worker finishes")]
fn delete_service(orchestrator_context: OrchestratorContext, name: String) -> OrchestratorContext {
    let orchestrator = orchestrator_context.orchestrator().clone();
    let context = orchestrator_context.clone();
    // A current-thread runtime keeps the worker parked until the ticket is
    // awaited, so the phase one state can be captured first.
    runtime().block_on(async move {
        let ticket = orchestrator
            .delete(TENANT, name.trim())
            .unwrap_or_else(|err| panic!("phase one should succeed: {err}"));
        let before = context.statuses(name.trim());
        context.observed().statuses_before_worker = Some(before);
        let outcome = ticket.outcome().await;
        context.observed().delete_outcome = Some(outcome);
    });
    orchestrator_context
}

#[then("the create response has outcomes for \"{names}\"")]
fn create_response_has_outcomes(
    orchestrator_context: &OrchestratorContext,
    names: String,
) -> Result<(), StepError> {
    let observed = orchestrator_context.observed();
    let Some(outcomes) = observed.outcomes.as_ref() else {
        return Err(StepError::Assertion(format!(
            "create did not return outcomes: {:?}",
            observed.error
        )));
    };
    let keys: Vec<String> = outcomes.keys().cloned().collect();
    if keys == split_names(&names) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected outcome keys: {keys:?}")))
    }
}

#[then("provider \"{provider}\" is \"{status}\"")]
fn provider_has_status(
    orchestrator_context: &OrchestratorContext,
    provider: String,
    status: String,
) -> Result<(), StepError> {
    let expected = parse_status(&status)?;
    let statuses = orchestrator_context.statuses("site");
    match statuses.get(provider.trim()) {
        Some(actual) if *actual == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {provider} to be {status}, found {other:?}"
        ))),
    }
}

#[then("provider \"{provider}\" is \"{status}\" with error info")]
fn provider_failed_with_error_info(
    orchestrator_context: &OrchestratorContext,
    provider: String,
    status: String,
) -> Result<(), StepError> {
    let expected = parse_status(&status)?;
    let record = orchestrator_context
        .orchestrator()
        .get(TENANT, "site")
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let Some(detail) = record.provider_details.get(provider.trim()) else {
        return Err(StepError::Assertion(format!("no detail for {provider}")));
    };
    if detail.status() == expected && detail.error_info().is_some_and(|info| !info.is_empty()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected detail: {detail:?}")))
    }
}

#[then("the service status is \"{status}\"")]
fn service_status_is(
    orchestrator_context: &OrchestratorContext,
    status: String,
) -> Result<(), StepError> {
    let record = orchestrator_context
        .orchestrator()
        .get(TENANT, "site")
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let expected = match status.trim() {
        "deployed" => ServiceStatus::Deployed,
        "failed" => ServiceStatus::Failed,
        other => return Err(StepError::Assertion(format!("unknown service status {other}"))),
    };
    if record.status() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, found {:?}",
            record.status()
        )))
    }
}

#[then("every provider was \"{status}\" before the worker ran")]
fn every_provider_was_before_worker(
    orchestrator_context: &OrchestratorContext,
    status: String,
) -> Result<(), StepError> {
    let expected = parse_status(&status)?;
    let observed = orchestrator_context.observed();
    let Some(before) = observed.statuses_before_worker.as_ref() else {
        return Err(StepError::Assertion(String::from("phase one was not observed")));
    };
    if !before.is_empty() && before.values().all(|actual| *actual == expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("phase one statuses: {before:?}")))
    }
}

#[then("every provider is still \"{status}\"")]
fn every_provider_is_still(
    orchestrator_context: &OrchestratorContext,
    status: String,
) -> Result<(), StepError> {
    let expected = parse_status(&status)?;
    let statuses = orchestrator_context.statuses("site");
    if !statuses.is_empty() && statuses.values().all(|actual| *actual == expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("statuses: {statuses:?}")))
    }
}

#[then("the delete outcome is deleted")]
fn delete_outcome_is_deleted(orchestrator_context: &OrchestratorContext) -> Result<(), StepError> {
    match orchestrator_context.observed().delete_outcome {
        Some(DeleteOutcome::Deleted) => Ok(()),
        ref other => Err(StepError::Assertion(format!("delete outcome: {other:?}"))),
    }
}

#[then("the delete outcome lists provider errors for \"{names}\"")]
fn delete_outcome_lists_errors(
    orchestrator_context: &OrchestratorContext,
    names: String,
) -> Result<(), StepError> {
    let expected = split_names(&names);
    match orchestrator_context.observed().delete_outcome {
        Some(DeleteOutcome::ProviderErrors { ref providers }) if *providers == expected => Ok(()),
        ref other => Err(StepError::Assertion(format!("delete outcome: {other:?}"))),
    }
}

#[then("the last delete attempt lists provider errors for \"{names}\"")]
fn last_attempt_lists_errors(
    orchestrator_context: &OrchestratorContext,
    names: String,
) -> Result<(), StepError> {
    let record = orchestrator_context
        .orchestrator()
        .get(TENANT, "site")
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let expected = split_names(&names);
    match record.last_delete_attempt.map(|attempt| attempt.outcome) {
        Some(DeleteAttemptOutcome::ProviderErrors { providers }) if providers == expected => Ok(()),
        other => Err(StepError::Assertion(format!("last delete attempt: {other:?}"))),
    }
}

#[then("fetching service \"{name}\" fails with not found")]
fn fetching_fails_with_not_found(
    orchestrator_context: &OrchestratorContext,
    name: String,
) -> Result<(), StepError> {
    match orchestrator_context.orchestrator().get(TENANT, name.trim()) {
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(StepError::Assertion(format!("unexpected error: {err}"))),
        Ok(record) => Err(StepError::Assertion(format!("record still present: {record:?}"))),
    }
}
