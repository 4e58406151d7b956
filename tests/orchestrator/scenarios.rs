//! BDD scenarios for service create and delete.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OrchestratorContext, orchestrator_context};

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Record mixed provider outcomes on create"
)]
fn scenario_mixed_create(orchestrator_context: OrchestratorContext) {
    let _ = orchestrator_context;
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Record providers missing from the registry as failed"
)]
fn scenario_unregistered_provider(orchestrator_context: OrchestratorContext) {
    let _ = orchestrator_context;
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Delete a service once every provider confirms"
)]
fn scenario_delete_success(orchestrator_context: OrchestratorContext) {
    let _ = orchestrator_context;
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Keep the service when a provider refuses the delete"
)]
fn scenario_delete_partial_failure(orchestrator_context: OrchestratorContext) {
    let _ = orchestrator_context;
}
