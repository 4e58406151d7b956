//! BDD step definitions for the durable request queue.

use edgeward::model::ModSanRequest;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{QueueContext, decode, domains};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn split_names(names: &str) -> Vec<String> {
    names.split(',').map(|name| name.trim().to_owned()).collect()
}

#[given("an empty request queue")]
fn empty_queue(queue_context: QueueContext) -> QueueContext {
    let queue = queue_context.open();
    assert!(
        queue
            .is_empty()
            .unwrap_or_else(|err| panic!("queue length: {err}")),
        "fresh queue should be empty"
    );
    queue_context
}

#[given("a SAN request for \"{domain}\" is enqueued")]
fn request_enqueued(queue_context: QueueContext, domain: String) -> QueueContext {
    let payload = ModSanRequest::san(domain.trim(), "premium")
        .to_payload()
        .unwrap_or_else(|err| panic!("encode request: {err}"));
    queue_context
        .queue()
        .enqueue(&payload)
        .unwrap_or_else(|err| panic!("enqueue: {err}"));
    queue_context
}

#[when("the queue is reopened")]
fn queue_reopened(queue_context: QueueContext) -> QueueContext {
    queue_context.open();
    queue_context
}

#[when("I traverse the queue")]
fn traverse_queue(queue_context: QueueContext) -> QueueContext {
    let entries = queue_context
        .queue()
        .traverse()
        .unwrap_or_else(|err| panic!("traverse: {err}"));
    queue_context.observed().traversal = entries.iter().map(|entry| decode(entry)).collect();
    queue_context
}

#[when("I dequeue without blocking twice")]
fn dequeue_twice(queue_context: QueueContext) -> QueueContext {
    let queue = queue_context.queue();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| panic!("test runtime should build: {err}"));
    let dequeued = runtime.block_on(async {
        let mut dequeued = Vec::new();
        for _ in 0..2 {
            let entry = queue
                .dequeue(false)
                .await
                .unwrap_or_else(|err| panic!("dequeue: {err}"));
            dequeued.push(entry.as_deref().map(decode));
        }
        dequeued
    });
    queue_context.observed().dequeued = dequeued;
    queue_context
}

#[then("the first dequeue returns the request for \"{domain}\"")]
fn first_dequeue_returns(queue_context: &QueueContext, domain: String) -> Result<(), StepError> {
    match queue_context.observed().dequeued.first() {
        Some(Some(request)) if request.domain_name == domain.trim() => Ok(()),
        other => Err(StepError::Assertion(format!("first dequeue: {other:?}"))),
    }
}

#[then("the second dequeue signals an empty queue")]
fn second_dequeue_is_empty(queue_context: &QueueContext) -> Result<(), StepError> {
    match queue_context.observed().dequeued.get(1) {
        Some(None) => Ok(()),
        other => Err(StepError::Assertion(format!("second dequeue: {other:?}"))),
    }
}

#[then("the traversal lists \"{names}\"")]
fn traversal_lists(queue_context: &QueueContext, names: String) -> Result<(), StepError> {
    let listed = domains(&queue_context.observed().traversal);
    if listed == split_names(&names) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("traversal: {listed:?}")))
    }
}

#[then("the dequeues return \"{names}\"")]
fn dequeues_return(queue_context: &QueueContext, names: String) -> Result<(), StepError> {
    let dequeued: Vec<ModSanRequest> = queue_context
        .observed()
        .dequeued
        .iter()
        .flatten()
        .cloned()
        .collect();
    let returned = domains(&dequeued);
    if returned == split_names(&names) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("dequeued: {returned:?}")))
    }
}
