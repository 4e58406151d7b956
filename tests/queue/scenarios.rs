//! BDD scenarios for the durable request queue.

use rstest_bdd_macros::scenario;

use super::test_helpers::{QueueContext, queue_context};

#[scenario(
    path = "tests/features/queue.feature",
    name = "Signal an empty queue instead of fabricating a request"
)]
fn scenario_second_dequeue_is_empty(queue_context: QueueContext) {
    let _ = queue_context;
}

#[scenario(
    path = "tests/features/queue.feature",
    name = "Traverse without consuming and dequeue in order"
)]
fn scenario_traverse_then_dequeue(queue_context: QueueContext) {
    let _ = queue_context;
}

#[scenario(
    path = "tests/features/queue.feature",
    name = "Keep requests across a reopen"
)]
fn scenario_reopen(queue_context: QueueContext) {
    let _ = queue_context;
}
