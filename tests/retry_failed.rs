//! Replaying failed requests on top of an earlier result map.

mod common;

use common::{dispatcher, profile, Behavior, StubProvider};
use prompt_dispatch::progress::{noop_sink, InMemoryProgressSink};
use prompt_dispatch::{Request, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn existing() -> HashMap<String, Response> {
    let mut map = HashMap::new();
    map.insert("a".to_string(), Response::success("a", "original answer"));
    map.insert("b".to_string(), Response::failure("b", "HTTP 503"));
    map.insert("c".to_string(), Response::failure("c", "cancelled"));
    map
}

fn batch() -> Vec<Request> {
    vec![
        Request::new("a", "echo", "one"),
        Request::new("b", "echo", "two"),
        Request::new("c", "echo", "three"),
    ]
}

#[tokio::test]
async fn test_successes_pass_through_untouched() {
    let echo = StubProvider::new(
        "echo",
        Behavior::Succeed {
            delay: Duration::ZERO,
        },
    );
    let d = dispatcher(&[(profile("echo", 600, 2, 0), echo.clone())]);
    let before = existing();
    let sink = Arc::new(InMemoryProgressSink::new());

    let merged = d
        .retry_failed_requests_with_progress(batch(), &before, sink.clone())
        .await
        .unwrap();

    assert_eq!(merged.len(), 3);
    assert_eq!(merged["a"], before["a"]);
    assert_eq!(merged["b"], Response::success("b", "b:ok"));
    assert_eq!(merged["c"], Response::success("c", "c:ok"));
    // Only the two replayed requests reach the provider and the sink.
    assert_eq!(echo.calls(), 2);
    assert_eq!(sink.len(), 2);
    assert!(sink.get_event("a").is_none());
    assert!(d.failed_requests().is_empty());
}

#[tokio::test]
async fn test_index_rebuilt_from_merged_outcome() {
    let echo = StubProvider::new("echo", Behavior::Fail { status: 500 });
    let d = dispatcher(&[(profile("echo", 600, 2, 0), echo)]);

    let merged = d.retry_failed_requests(batch(), &existing()).await.unwrap();

    assert_eq!(merged["a"].content, "original answer");
    assert!(merged["b"].is_error());
    let mut failed: Vec<String> = d.failed_requests().into_keys().collect();
    failed.sort();
    assert_eq!(failed, vec!["b", "c"]);
}

#[tokio::test]
async fn test_replaying_the_failed_index() {
    let echo = StubProvider::new("echo", Behavior::FailTimes { n: 3 });
    let d = dispatcher(&[(profile("echo", 600, 1, 0), echo)]);

    let first = d
        .send_requests(vec![Request::new("only", "echo", "p")], noop_sink())
        .await
        .unwrap();
    assert!(first["only"].is_error());

    let failed: Vec<Request> = d.failed_requests().into_values().collect();
    assert_eq!(failed.len(), 1);
    let merged = d.retry_failed_requests(failed, &first).await.unwrap();
    assert_eq!(merged["only"].content, "only:ok");
    assert!(d.failed_requests().is_empty());
}

#[tokio::test]
async fn test_nothing_to_retry() {
    let echo = StubProvider::new(
        "echo",
        Behavior::Succeed {
            delay: Duration::ZERO,
        },
    );
    let d = dispatcher(&[(profile("echo", 600, 1, 0), echo.clone())]);
    let mut all_ok = HashMap::new();
    all_ok.insert("a".to_string(), Response::success("a", "done"));

    let merged = d
        .retry_failed_requests(vec![Request::new("a", "echo", "p")], &all_ok)
        .await
        .unwrap();
    assert_eq!(merged, all_ok);
    assert_eq!(echo.calls(), 0);
}
