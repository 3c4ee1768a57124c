use super::*;
use crate::error::HockError;
use crate::expectation::{CallPolicy, Delay, Expectation, IncomingRequest, Method, Reply};
use crate::queue::{ExpectationQueue, UnmatchedPolicy};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;

fn queue_with(expectations: Vec<(Expectation, Reply)>) -> Arc<ExpectationQueue> {
    let queue = Arc::new(ExpectationQueue::new());
    for (mut expectation, reply) in expectations {
        expectation.set_reply(reply);
        queue.register(expectation).unwrap();
    }
    queue
}

async fn body_string(response: hyper::Response<HockBody>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_dispatch_replies_and_consumes() {
    let queue = queue_with(vec![(
        Expectation::new(Method::Get, "/url"),
        Reply::new().body("hello"),
    )]);

    let response = dispatch(&queue, IncomingRequest::new("GET", "/url"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_dispatch_fail_fast_returns_error() {
    let queue = queue_with(vec![]);
    let Err(err) = dispatch(&queue, IncomingRequest::new("GET", "/nope")).await else {
        panic!("unmatched request was answered");
    };
    assert_eq!(
        err,
        HockError::UnmatchedRequest {
            method: "GET".into(),
            url: "/nope".into()
        }
    );
    assert_eq!(queue.check_done(), Err(err));
}

#[tokio::test]
async fn test_dispatch_soft_fail_replies_500() {
    let queue = queue_with(vec![]);
    queue.set_unmatched_policy(UnmatchedPolicy::SoftFail);

    let response = dispatch(&queue, IncomingRequest::new("POST", "/x").with_body("{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(body_string(response).await, "No Matching Response!\n");

    let unmatched = queue.unmatched_requests();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].body.as_deref(), Some("{}"));
    assert!(queue.check_done().is_ok());
}

#[tokio::test]
async fn test_dispatch_merges_default_headers() {
    let queue = queue_with(vec![
        (
            Expectation::new(Method::Get, "/a"),
            Reply::new().header("X-Kind", "specific"),
        ),
        (Expectation::new(Method::Get, "/b"), Reply::new()),
    ]);
    queue.set_default_reply_headers(vec![
        ("X-Kind".into(), "default".into()),
        ("X-Extra".into(), "yes".into()),
    ]);

    let a = dispatch(&queue, IncomingRequest::new("GET", "/a"))
        .await
        .unwrap();
    assert_eq!(a.headers().get("x-kind").unwrap(), "specific");
    assert_eq!(a.headers().get("x-extra").unwrap(), "yes");

    let b = dispatch(&queue, IncomingRequest::new("GET", "/b"))
        .await
        .unwrap();
    assert_eq!(b.headers().get("x-kind").unwrap(), "default");
}

#[tokio::test]
async fn test_missing_reply_file_keeps_expectation() {
    let queue = queue_with(vec![(
        Expectation::new(Method::Get, "/file"),
        Reply::new().body(crate::expectation::ReplyBody::file(
            "/definitely/not/here.txt",
        )),
    )]);

    let response = dispatch(&queue, IncomingRequest::new("GET", "/file"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending()[0].consumed, 0);
}

#[tokio::test]
async fn test_reply_file_is_streamed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reply.txt");
    std::fs::write(&path, "from disk").unwrap();

    let queue = queue_with(vec![(
        Expectation::new(Method::Get, "/file"),
        Reply::new()
            .status(201)
            .body(crate::expectation::ReplyBody::file(&path)),
    )]);

    let response = dispatch(&queue, IncomingRequest::new("GET", "/file"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "from disk");
}

#[tokio::test]
async fn test_cancelled_delay_releases_claim() {
    let mut expectation = Expectation::new(Method::Get, "/slow");
    expectation.set_delay(Some(Delay::Fixed(5_000)));
    let queue = queue_with(vec![(expectation, Reply::new())]);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        dispatch(&queue, IncomingRequest::new("GET", "/slow")),
    )
    .await;
    assert!(result.is_err());

    // The claim went back, so the expectation can still be served
    let snapshot = queue.find_match(&IncomingRequest::new("GET", "/slow"));
    assert!(snapshot.is_some());
    assert_eq!(queue.pending()[0].consumed, 0);
}

#[tokio::test]
async fn test_handler_buffers_hyper_request() {
    let mut expectation = Expectation::new(Method::Post, "/post").with_body("payload");
    *expectation.policy_mut() = CallPolicy::twice();
    let queue = queue_with(vec![(expectation, Reply::new().body_fn(|req| {
        Bytes::from(format!("echo:{}", req.body))
    }))]);
    let handler = Handler::new(Arc::clone(&queue));

    let request = Request::builder()
        .method("POST")
        .uri("/post")
        .header("X-Test", "1")
        .body(Full::new(Bytes::from_static(b"payload")))
        .unwrap();

    let response = handler.handle(request).await.unwrap();
    assert_eq!(body_string(response).await, "echo:payload");
    assert_eq!(queue.pending()[0].consumed, 1);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_soft_fail_logs_unmatched_request() {
    let queue = queue_with(vec![]);
    queue.set_unmatched_policy(UnmatchedPolicy::SoftFail);

    dispatch(&queue, IncomingRequest::new("PATCH", "/p").with_body("changed"))
        .await
        .unwrap();
    assert!(logs_contain("No Match For: PATCH /p"));
    assert!(logs_contain("Unmatched request body: changed"));
}

#[tokio::test]
async fn test_truncated_body_leaves_queue_untouched() {
    use futures::stream;
    use http_body_util::StreamBody;
    use hyper::body::Frame;

    let queue = queue_with(vec![(
        Expectation::new(Method::Post, "/upload"),
        Reply::new().status(201),
    )]);
    let handler = Handler::new(Arc::clone(&queue));

    let chunks: Vec<std::io::Result<Frame<Bytes>>> = vec![
        Ok(Frame::data(Bytes::from_static(b"partial"))),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        )),
    ];
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(StreamBody::new(stream::iter(chunks)))
        .unwrap();

    let Err(err) = handler.handle(request).await else {
        panic!("truncated request was dispatched");
    };
    assert!(matches!(err, HockError::RequestBody { ref method, .. } if method == "POST"));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.pending()[0].consumed, 0);
    assert!(queue.unmatched_requests().is_empty());
    assert!(queue.check_done().is_err());
}
