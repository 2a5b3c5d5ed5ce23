// ABOUTME: Tests for the TaskDispatcher - admission order, dispatch, reconciliation.
// ABOUTME: Covers duplicate ids, rate limiting, debits, and redelivered reports.

use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::TaskDispatcher;
use super::task::{TaskRequest, TaskState};
use crate::error::DispatchError;
use crate::ledger::ResourceLedger;
use crate::limiter::RateLimiter;
use crate::registry::ModelRegistry;

struct Fixture {
    dispatcher: Arc<TaskDispatcher>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<ModelRegistry>,
}

/// User `u1` with `resources` and `tokens`; active model `m1` costing `cost`.
async fn fixture(resources: u64, tokens: u64, cost: u64) -> Fixture {
    let limiter = Arc::new(RateLimiter::new(10, 1, Duration::from_secs(60)));
    let ledger = Arc::new(ResourceLedger::new());
    let registry = Arc::new(ModelRegistry::new());

    ledger.register("u1", resources, 0).await.unwrap();
    limiter.seed("u1", tokens).await;
    registry.register("m1", cost).await.unwrap();
    registry.distribute_chunk("m1", 0, vec![0]).await.unwrap();
    registry.activate("m1").await.unwrap();

    let dispatcher = Arc::new(TaskDispatcher::new(
        limiter.clone(),
        ledger.clone(),
        registry.clone(),
        1,
    ));
    Fixture {
        dispatcher,
        limiter,
        ledger,
        registry,
    }
}

fn request(task_id: &str) -> TaskRequest {
    TaskRequest::new(task_id, "u1", "m1").payload("prompt")
}

#[tokio::test]
async fn test_submit_dispatches_and_debits() {
    let f = fixture(10, 10, 4).await;

    let task = f.dispatcher.submit(request("t1")).await.unwrap();
    assert_eq!(task.state, TaskState::Dispatched);
    assert_eq!(task.cost, 4);
    assert_eq!(task.payload, b"prompt".to_vec());
    assert!(task.result.is_none());

    assert_eq!(f.ledger.resources("u1").await, Ok(6));
    assert_eq!(f.limiter.tokens("u1").await, Some(9));
    assert_eq!(f.dispatcher.get("t1").await.unwrap(), task);
}

#[tokio::test]
async fn test_duplicate_submission_rejected() {
    let f = fixture(10, 10, 1).await;
    f.dispatcher.submit(request("t1")).await.unwrap();

    let err = f.dispatcher.submit(request("t1")).await.unwrap_err();
    assert_eq!(err, DispatchError::DuplicateTask("t1".to_string()));

    // No token or resources spent on the duplicate.
    assert_eq!(f.ledger.resources("u1").await, Ok(9));
    assert_eq!(f.limiter.tokens("u1").await, Some(9));
    assert_eq!(f.dispatcher.count(), 1);
}

#[tokio::test]
async fn test_duplicate_of_terminal_task_rejected() {
    let f = fixture(10, 10, 1).await;
    f.dispatcher.submit(request("t1")).await.unwrap();
    f.dispatcher.report_result("t1", b"ok".to_vec()).await.unwrap();

    let err = f.dispatcher.submit(request("t1")).await.unwrap_err();
    assert_eq!(err, DispatchError::DuplicateTask("t1".to_string()));
    assert_eq!(f.dispatcher.get("t1").await.unwrap().state, TaskState::Completed);
}

#[tokio::test]
async fn test_unknown_user_and_model() {
    let f = fixture(10, 10, 1).await;

    let err = f
        .dispatcher
        .submit(TaskRequest::new("t1", "ghost", "m1"))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownUser("ghost".to_string()));

    let err = f
        .dispatcher
        .submit(TaskRequest::new("t1", "u1", "nope"))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownModel("nope".to_string()));

    // Rejected ids stay free.
    assert!(f.dispatcher.submit(request("t1")).await.is_ok());
}

#[tokio::test]
async fn test_inactive_model_rejected_before_rate_limit() {
    let f = fixture(10, 10, 1).await;
    f.registry.register("m2", 1).await.unwrap();

    let err = f
        .dispatcher
        .submit(TaskRequest::new("t1", "u1", "m2"))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::ModelInactive("m2".to_string()));
    assert_eq!(f.limiter.tokens("u1").await, Some(10));
}

#[tokio::test]
async fn test_rate_limited_creates_nothing() {
    let f = fixture(10, 0, 1).await;

    let err = f.dispatcher.submit(request("t1")).await.unwrap_err();
    assert_eq!(err, DispatchError::RateLimited("u1".to_string()));

    assert_eq!(f.ledger.resources("u1").await, Ok(10));
    assert_eq!(
        f.dispatcher.get("t1").await,
        Err(DispatchError::UnknownTask("t1".to_string()))
    );
    assert_eq!(f.dispatcher.count(), 0);
}

#[tokio::test]
async fn test_insufficient_resources_still_spends_token() {
    let f = fixture(3, 10, 5).await;

    let err = f.dispatcher.submit(request("t1")).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::InsufficientResources {
            user_id: "u1".to_string(),
            required: 5,
            available: 3,
        }
    );
    assert_eq!(f.ledger.resources("u1").await, Ok(3));
    assert_eq!(f.limiter.tokens("u1").await, Some(9));
    assert_eq!(f.dispatcher.count(), 0);
}

#[tokio::test]
async fn test_report_result_credits_once() {
    let f = fixture(10, 10, 1).await;
    f.dispatcher.submit(request("t1")).await.unwrap();

    let first = f.dispatcher.report_result("t1", b"ok".to_vec()).await.unwrap();
    assert!(!first.is_duplicate());
    assert_eq!(first.task().state, TaskState::Completed);
    assert_eq!(first.result(), Some(&b"ok"[..]));
    assert_eq!(f.ledger.rewards("u1").await, Ok(1));

    let second = f
        .dispatcher
        .report_result("t1", b"different".to_vec())
        .await
        .unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.result(), Some(&b"ok"[..]));
    assert_eq!(f.ledger.rewards("u1").await, Ok(1));
}

#[tokio::test]
async fn test_report_unknown_task() {
    let f = fixture(10, 10, 1).await;
    assert_eq!(
        f.dispatcher.report_result("ghost", vec![]).await,
        Err(DispatchError::UnknownTask("ghost".to_string()))
    );
    assert_eq!(
        f.dispatcher.report_failure("ghost", "boom").await,
        Err(DispatchError::UnknownTask("ghost".to_string()))
    );
}

#[tokio::test]
async fn test_report_failure_no_credit_no_refund() {
    let f = fixture(10, 10, 4).await;
    f.dispatcher.submit(request("t1")).await.unwrap();

    let outcome = f.dispatcher.report_failure("t1", "gpu lost").await.unwrap();
    assert!(!outcome.is_duplicate());
    assert_eq!(outcome.task().state, TaskState::Failed);
    assert_eq!(outcome.task().failure.as_deref(), Some("gpu lost"));
    assert!(outcome.result().is_none());

    assert_eq!(f.ledger.rewards("u1").await, Ok(0));
    assert_eq!(f.ledger.resources("u1").await, Ok(6));

    let again = f.dispatcher.report_failure("t1", "again").await.unwrap();
    assert!(again.is_duplicate());
    assert_eq!(again.task().failure.as_deref(), Some("gpu lost"));
}

#[tokio::test]
async fn test_cross_terminal_reports_rejected() {
    let f = fixture(10, 10, 1).await;
    f.dispatcher.submit(request("done")).await.unwrap();
    f.dispatcher.submit(request("broken")).await.unwrap();
    f.dispatcher.report_result("done", b"ok".to_vec()).await.unwrap();
    f.dispatcher.report_failure("broken", "boom").await.unwrap();

    assert_eq!(
        f.dispatcher.report_failure("done", "late").await,
        Err(DispatchError::AlreadyTerminal {
            task_id: "done".to_string(),
            state: TaskState::Completed,
        })
    );
    assert_eq!(
        f.dispatcher.report_result("broken", b"late".to_vec()).await,
        Err(DispatchError::AlreadyTerminal {
            task_id: "broken".to_string(),
            state: TaskState::Failed,
        })
    );
    assert_eq!(f.ledger.rewards("u1").await, Ok(1));
}

#[tokio::test]
async fn test_tasks_for_owner() {
    let f = fixture(10, 10, 1).await;
    f.ledger.register("u2", 10, 0).await.unwrap();

    f.dispatcher.submit(request("b")).await.unwrap();
    f.dispatcher.submit(request("a")).await.unwrap();
    f.dispatcher
        .submit(TaskRequest::new("c", "u2", "m1"))
        .await
        .unwrap();

    let ids: Vec<String> = f
        .dispatcher
        .tasks_for_owner("u1")
        .await
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_concurrent_duplicate_submissions_single_dispatch() {
    let f = fixture(100, 10, 1).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dispatcher = f.dispatcher.clone();
        handles.push(tokio::spawn(async move { dispatcher.submit(request("t1")).await }));
    }

    let mut dispatched = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => dispatched += 1,
            Err(DispatchError::DuplicateTask(_)) => duplicates += 1,
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    assert_eq!(dispatched, 1);
    assert_eq!(duplicates, 9);
    assert_eq!(f.ledger.resources("u1").await, Ok(99));
}

#[tokio::test]
async fn test_concurrent_submissions_never_overdraw() {
    let f = fixture(7, 10, 2).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let dispatcher = f.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.submit(request(&format!("t{}", i))).await
        }));
    }

    let mut dispatched = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            dispatched += 1;
        }
    }

    assert_eq!(dispatched, 3);
    assert_eq!(f.ledger.resources("u1").await, Ok(1));
}

#[tokio::test]
async fn test_concurrent_result_redelivery_credits_once() {
    let f = fixture(10, 10, 1).await;
    f.dispatcher.submit(request("t1")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dispatcher = f.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.report_result("t1", b"ok".to_vec()).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if !handle.await.unwrap().unwrap().is_duplicate() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(f.ledger.rewards("u1").await, Ok(1));
}
