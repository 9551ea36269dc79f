//! Unit tests for the outbound correlation registry.
//!
//! Covers:
//! - monotonically increasing ids starting at 1
//! - resolution delivering results and typed errors
//! - stale responses reported and dropped
//! - timeouts removing the entry
//! - teardown failing every pending request exactly once
//! - concurrent requests each resolved by their own response

use std::time::Duration;

use serde_json::json;

use acp_link::acp::envelope::{RequestId, Response, RpcError};
use acp_link::acp::registry::CorrelationRegistry;
use acp_link::errors::RESOURCE_NOT_FOUND;
use acp_link::AppError;

const WAIT: Duration = Duration::from_secs(5);

// ── Allocation ──────────────────────────────────────────────────────────────

/// Ids start at 1 and increase per registration.
#[test]
fn ids_are_sequential_from_one() {
    let registry = CorrelationRegistry::new();

    let (first, _p1) = registry.register("fs/read_text_file");
    let (second, _p2) = registry.register("fs/read_text_file");

    assert_eq!(first, RequestId::Number(1));
    assert_eq!(second, RequestId::Number(2));
    assert_eq!(registry.len(), 2);
}

/// Dropping the completion handle removes the entry.
#[test]
fn dropping_handle_removes_entry() {
    let registry = CorrelationRegistry::new();
    let (_, pending) = registry.register("terminal/create");
    assert_eq!(registry.len(), 1);

    drop(pending);
    assert!(registry.is_empty(), "abandoned request must leave the registry");
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// A matching response completes the waiter with its result.
#[tokio::test]
async fn resolve_delivers_result() {
    let registry = CorrelationRegistry::new();
    let (id, pending) = registry.register("fs/read_text_file");

    assert!(registry.resolve(Response::success(id, json!({"content": "hi"}))));
    let value = pending.wait(WAIT).await.expect("result");

    assert_eq!(value, json!({"content": "hi"}));
    assert!(registry.is_empty());
}

/// An error response completes the waiter with the typed error.
#[tokio::test]
async fn resolve_delivers_typed_error() {
    let registry = CorrelationRegistry::new();
    let (id, pending) = registry.register("fs/read_text_file");

    let response = Response {
        id,
        payload: acp_link::acp::envelope::ResponsePayload::Error(RpcError {
            code: RESOURCE_NOT_FOUND,
            message: "/missing".into(),
            data: None,
        }),
    };
    registry.resolve(response);

    let err = pending.wait(WAIT).await.expect_err("error response");
    assert_eq!(err, AppError::ResourceNotFound("/missing".into()));
}

/// A response for an unknown id is dropped and reported as stale.
#[test]
fn stale_response_is_dropped() {
    let registry = CorrelationRegistry::new();
    assert!(
        !registry.resolve(Response::success(RequestId::Number(99), json!(null))),
        "unknown id must not resolve"
    );
}

/// A duplicate response is stale after the first one resolved the entry.
#[tokio::test]
async fn duplicate_response_resolves_once() {
    let registry = CorrelationRegistry::new();
    let (id, pending) = registry.register("terminal/output");

    assert!(registry.resolve(Response::success(id.clone(), json!(1))));
    assert!(!registry.resolve(Response::success(id, json!(2))));
    assert_eq!(pending.wait(WAIT).await.expect("first result"), json!(1));
}

// ── Expiry and teardown ─────────────────────────────────────────────────────

/// A request without a response times out and leaves the registry.
#[tokio::test]
async fn wait_times_out() {
    let registry = CorrelationRegistry::new();
    let (id, pending) = registry.register("terminal/wait_for_exit");

    let err = pending
        .wait(Duration::from_millis(20))
        .await
        .expect_err("must time out");
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    assert!(registry.is_empty());
    assert!(
        !registry.resolve(Response::success(id, json!(null))),
        "late response must be stale"
    );
}

/// `cancel_all` fails every pending request with `ConnectionClosed`.
#[tokio::test]
async fn cancel_all_fails_everything() {
    let registry = CorrelationRegistry::new();
    let (_, a) = registry.register("fs/read_text_file");
    let (_, b) = registry.register("terminal/create");

    assert_eq!(registry.cancel_all("peer went away"), 2);
    assert!(registry.is_empty());

    for pending in [a, b] {
        let err = pending.wait(WAIT).await.expect_err("cancelled");
        assert_eq!(err, AppError::ConnectionClosed("peer went away".into()));
    }
}

// ── Concurrency ─────────────────────────────────────────────────────────────

/// Many concurrent requests each receive exactly their own response.
#[tokio::test]
async fn concurrent_requests_correlate_independently() {
    let registry = CorrelationRegistry::new();
    let mut waiters = Vec::new();
    let mut ids = Vec::new();

    for _ in 0..32 {
        let (id, pending) = registry.register("terminal/output");
        ids.push(id.clone());
        waiters.push(tokio::spawn(async move { (id, pending.wait(WAIT).await) }));
    }

    // Answer in reverse order, echoing each id in the result.
    for id in ids.iter().rev() {
        let RequestId::Number(n) = id else {
            panic!("registry allocates numeric ids");
        };
        assert!(registry.resolve(Response::success(id.clone(), json!(n))));
    }

    for waiter in waiters {
        let (id, outcome) = waiter.await.expect("join");
        let RequestId::Number(n) = id else {
            panic!("numeric id");
        };
        assert_eq!(outcome.expect("resolved"), json!(n));
    }
    assert!(registry.is_empty(), "every entry must be removed exactly once");
}
