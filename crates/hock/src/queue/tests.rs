//! Tests for the expectation queue.
//!
//! Covers first-match-wins ordering, reservation accounting, removal at max,
//! done checks, hasRoute and the drained signal.

use super::*;
use crate::error::HockError;
use crate::expectation::{Expectation, Filter, IncomingRequest, Method, QueryMatching, Reply};
use std::collections::HashMap;
use std::sync::Arc;

fn get(url: &str) -> Expectation {
    Expectation::new(Method::Get, url)
}

fn request(url: &str) -> IncomingRequest {
    IncomingRequest::new("GET", url)
}

/// Reserve and commit, as the dispatcher does.
fn dispatch(queue: &Arc<ExpectationQueue>, req: &IncomingRequest) -> Option<u64> {
    let reservation = queue.reserve(req)?;
    let id = reservation.expectation_id();
    reservation.commit().unwrap();
    Some(id)
}

#[test]
fn test_register_assigns_increasing_ids() {
    let queue = ExpectationQueue::new();
    let a = queue.register(get("/a")).unwrap();
    let b = queue.register(get("/b")).unwrap();
    assert!(b > a);
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_register_on_closed_queue_fails() {
    let queue = ExpectationQueue::new();
    queue.close();
    let err = queue.register(get("/a")).unwrap_err();
    assert!(matches!(err, HockError::Configuration(_)));
}

#[test]
fn test_first_registered_wins() {
    let queue = Arc::new(ExpectationQueue::new());
    let a = queue.register(get("/same")).unwrap();
    let b = queue.register(get("/same")).unwrap();

    assert_eq!(queue.find_match(&request("/same")).map(|s| s.id), Some(a));
    assert_eq!(dispatch(&queue, &request("/same")), Some(a));
    assert_eq!(dispatch(&queue, &request("/same")), Some(b));
    assert_eq!(dispatch(&queue, &request("/same")), None);
}

#[test]
fn test_first_stays_preferred_while_it_has_capacity() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut twice = get("/same");
    *twice.policy_mut() = crate::expectation::CallPolicy::twice();
    let a = queue.register(twice).unwrap();
    let b = queue.register(get("/same")).unwrap();

    assert_eq!(dispatch(&queue, &request("/same")), Some(a));
    assert_eq!(dispatch(&queue, &request("/same")), Some(a));
    assert_eq!(dispatch(&queue, &request("/same")), Some(b));
}

#[test]
fn test_once_is_removed_after_one_call() {
    let queue = Arc::new(ExpectationQueue::new());
    queue.register(get("/url")).unwrap();

    assert!(dispatch(&queue, &request("/url")).is_some());
    assert!(queue.is_empty());
    assert!(dispatch(&queue, &request("/url")).is_none());
    assert!(queue.check_done().is_ok());
}

#[test]
fn test_find_match_is_read_only() {
    let queue = ExpectationQueue::new();
    queue.register(get("/url")).unwrap();
    for _ in 0..5 {
        assert!(queue.find_match(&request("/url")).is_some());
    }
    assert_eq!(queue.pending()[0].consumed, 0);
}

#[test]
fn test_reservation_blocks_other_claims_until_released() {
    let queue = Arc::new(ExpectationQueue::new());
    queue.register(get("/one")).unwrap();

    let first = queue.reserve(&request("/one")).unwrap();
    assert!(queue.reserve(&request("/one")).is_none());
    assert!(!queue.has_route("GET", "/one", None, None));

    drop(first);
    assert_eq!(queue.pending()[0].consumed, 0);
    assert!(queue.reserve(&request("/one")).is_some());
}

#[test]
fn test_commit_after_release_of_other_reservation() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut policy_two = get("/two");
    *policy_two.policy_mut() = crate::expectation::CallPolicy::twice();
    queue.register(policy_two).unwrap();

    let a = queue.reserve(&request("/two")).unwrap();
    let b = queue.reserve(&request("/two")).unwrap();
    assert!(queue.reserve(&request("/two")).is_none());

    drop(a);
    b.commit().unwrap();
    assert_eq!(queue.pending()[0].consumed, 1);
    assert!(dispatch(&queue, &request("/two")).is_some());
    assert!(queue.is_empty());
}

#[test]
fn test_record_dispatch_without_reservation() {
    let queue = ExpectationQueue::new();
    let id = queue.register(get("/r")).unwrap();
    queue.record_dispatch(id).unwrap();
    assert!(queue.is_empty());
    assert!(matches!(
        queue.record_dispatch(id),
        Err(HockError::Configuration(_))
    ));
}

#[test]
fn test_done_min_two_max_two() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut exp = get("/url");
    exp.policy_mut().set_min(2);
    queue.register(exp).unwrap();

    dispatch(&queue, &request("/url")).unwrap();
    match queue.check_done() {
        Err(HockError::OutstandingExpectations(items)) => {
            assert_eq!(items, vec!["GET /url".to_string()]);
        }
        other => panic!("expected outstanding expectations, got {other:?}"),
    }

    dispatch(&queue, &request("/url")).unwrap();
    assert!(queue.check_done().is_ok());
}

#[test]
fn test_done_any_with_zero_calls() {
    let queue = ExpectationQueue::new();
    let mut exp = get("/optional");
    *exp.policy_mut() = crate::expectation::CallPolicy::any();
    queue.register(exp).unwrap();

    assert!(queue.check_done().is_ok());
    assert!(queue.is_empty());
}

#[test]
fn test_done_many_with_zero_calls_fails() {
    let queue = ExpectationQueue::new();
    let mut exp = get("/many");
    *exp.policy_mut() = crate::expectation::CallPolicy::many();
    queue.register(exp).unwrap();
    assert!(matches!(
        queue.check_done(),
        Err(HockError::OutstandingExpectations(_))
    ));
}

#[test]
fn test_done_clears_satisfied_leftovers() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut exp = get("/range");
    exp.policy_mut().set_min(1);
    exp.policy_mut().set_max(Some(3));
    queue.register(exp).unwrap();

    dispatch(&queue, &request("/range")).unwrap();
    assert_eq!(queue.len(), 1);
    assert!(queue.check_done().is_ok());
    assert!(queue.is_empty());
}

#[test]
fn test_done_failure_leaves_queue_untouched() {
    let queue = ExpectationQueue::new();
    queue.register(get("/a")).unwrap();
    let mut optional = get("/b");
    *optional.policy_mut() = crate::expectation::CallPolicy::any();
    queue.register(optional).unwrap();

    assert!(queue.check_done().is_err());
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_done_reports_conflicting_policy() {
    let queue = ExpectationQueue::new();
    let mut exp = get("/conflict");
    exp.policy_mut().set_max(Some(1));
    exp.policy_mut().set_min(4);
    queue.register(exp).unwrap();

    match queue.check_done() {
        Err(HockError::Configuration(msg)) => assert!(msg.contains("GET /conflict")),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn test_unmatched_fail_fast_is_sticky_in_done() {
    let queue = ExpectationQueue::new();
    let err = queue.record_unmatched(&request("/nope"));
    assert_eq!(
        err,
        Some(HockError::UnmatchedRequest {
            method: "GET".to_string(),
            url: "/nope".to_string()
        })
    );
    assert!(matches!(
        queue.check_done(),
        Err(HockError::UnmatchedRequest { .. })
    ));
    assert_eq!(queue.unmatched_requests().len(), 1);
}

#[test]
fn test_unmatched_soft_fail_keeps_queue() {
    let queue = ExpectationQueue::new();
    queue.set_unmatched_policy(UnmatchedPolicy::SoftFail);
    queue.register(get("/a")).unwrap();

    let post = IncomingRequest::new("POST", "/x").with_body("payload");
    assert!(queue.record_unmatched(&post).is_none());
    assert_eq!(queue.len(), 1);

    let logged = queue.unmatched_requests();
    assert_eq!(logged[0].body.as_deref(), Some("payload"));
    assert!(queue.record_unmatched(&request("/y")).is_none());
    assert_eq!(queue.unmatched_requests()[1].body, None);
}

#[test]
fn test_has_route_is_read_only_and_order_insensitive() {
    let queue = ExpectationQueue::new();
    queue.register(get("/p?a=1&b=2")).unwrap();

    for _ in 0..3 {
        assert!(queue.has_route("GET", "/p?b=2&a=1", None, None));
        assert!(queue.has_route("GET", "/p?a=1&b=2", None, None));
    }
    assert!(!queue.has_route("GET", "/p?a=1", None, None));
    assert!(!queue.has_route("POST", "/p?a=1&b=2", None, None));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending()[0].consumed, 0);
}

#[test]
fn test_has_route_with_body_and_headers() {
    let queue = ExpectationQueue::new();
    queue
        .register(
            Expectation::new(Method::Post, "/post")
                .with_body("data")
                .with_headers([("X-Key", "k")]),
        )
        .unwrap();

    let mut good = HashMap::new();
    good.insert("x-key".to_string(), "k".to_string());
    let mut bad = HashMap::new();
    bad.insert("X-Key".to_string(), "other".to_string());

    assert!(queue.has_route("POST", "/post", Some("data"), None));
    assert!(queue.has_route("POST", "/post", Some("data"), Some(&good)));
    assert!(!queue.has_route("POST", "/post", Some("data"), Some(&bad)));
    assert!(!queue.has_route("POST", "/post", None, None));
}

#[test]
fn test_dispatch_query_mode_is_configurable() {
    let queue = Arc::new(ExpectationQueue::new());
    queue.register(get("/p?a=1&b=2")).unwrap();

    assert!(queue.reserve(&request("/p?b=2&a=1")).is_none());
    queue.set_query_matching(QueryMatching::Unordered);
    assert!(dispatch(&queue, &request("/p?b=2&a=1")).is_some());
}

#[test]
fn test_filters_can_be_replaced_and_cleared() {
    let queue = ExpectationQueue::new();
    queue.register(get("/items/ID")).unwrap();

    assert!(!queue.has_route("GET", "/items/7", None, None));
    queue.set_path_filter(Filter::regex(r"\d+", "ID").unwrap());
    assert!(queue.has_route("GET", "/items/7", None, None));
    queue.set_path_filter(Filter::new(|p| p.to_string()));
    assert!(!queue.has_route("GET", "/items/7", None, None));
    queue.set_path_filter(Filter::regex(r"\d+", "ID").unwrap());
    queue.clear_path_filter();
    assert!(!queue.has_route("GET", "/items/7", None, None));
}

#[test]
fn test_body_filter_and_clear() {
    let queue = ExpectationQueue::new();
    queue
        .register(Expectation::new(Method::Put, "/doc").with_body("v=X"))
        .unwrap();

    queue.set_body_filter(Filter::regex(r"v=\d+", "v=X").unwrap());
    assert!(queue.has_route("PUT", "/doc", Some("v=3"), None));
    queue.clear_body_filter();
    assert!(!queue.has_route("PUT", "/doc", Some("v=3"), None));
}

#[test]
fn test_reservation_renders_reply() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut exp = get("/r");
    exp.set_reply(Reply::new().status(204));
    queue.register(exp).unwrap();

    let reservation = queue.reserve(&request("/r")).unwrap();
    assert_eq!(reservation.render(&request("/r")).status, 204);
    assert_eq!(reservation.describe(), "GET /r");
}

#[tokio::test]
async fn test_drained_signal_fires_once_when_emptied() {
    let queue = Arc::new(ExpectationQueue::new());
    queue.register(get("/a")).unwrap();
    queue.register(get("/b")).unwrap();
    let mut rx = queue.subscribe_drained();

    dispatch(&queue, &request("/a")).unwrap();
    assert!(rx.try_recv().is_err());

    dispatch(&queue, &request("/b")).unwrap();
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_drained_future_resolves() {
    let queue = Arc::new(ExpectationQueue::new());
    queue.register(get("/a")).unwrap();

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.drained().await })
    };

    tokio::task::yield_now().await;
    dispatch(&queue, &request("/a")).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .expect("drained did not resolve")
        .unwrap();

    // Already empty: resolves immediately
    queue.drained().await;
}

#[tokio::test]
async fn test_done_clearing_leftovers_wakes_drained_waiters() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut exp = get("/optional");
    *exp.policy_mut() = crate::expectation::CallPolicy::any();
    queue.register(exp).unwrap();
    let mut rx = queue.subscribe_drained();

    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.drained().await })
    };
    tokio::task::yield_now().await;

    queue.check_done().unwrap();
    assert!(queue.is_empty());
    assert!(rx.try_recv().is_ok());
    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .expect("drained did not resolve after done")
        .unwrap();

    // A second done on an empty queue does not signal again
    queue.check_done().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_concurrent_claims_never_exceed_max() {
    let queue = Arc::new(ExpectationQueue::new());
    let mut exp = get("/limited");
    *exp.policy_mut() = crate::expectation::CallPolicy::exactly(3);
    queue.register(exp).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || dispatch(&queue, &request("/limited")).is_some())
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 3);
    assert!(queue.is_empty());
}
