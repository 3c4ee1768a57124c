//! Request dispatch for hock.
//!
//! Buffers the inbound body, claims a matching expectation, applies its delay
//! and writes the rendered reply. File and stream bodies are streamed.

use crate::error::HockError;
use crate::expectation::{merge_headers, IncomingRequest, RenderedBody};
use crate::metrics;
use crate::queue::ExpectationQueue;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Response body type produced by the dispatcher.
pub type HockBody = UnsyncBoxBody<Bytes, io::Error>;

const NO_MATCH_BODY: &str = "No Matching Response!\n";

fn full_body(bytes: impl Into<Bytes>) -> HockBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn stream_body<S>(stream: S) -> HockBody
where
    S: futures::Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<HockBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(full_body(body))
        .unwrap_or_else(|_| Response::new(full_body("Internal Server Error")))
}

/// Buffer the request body, then dispatch.
///
/// A body that fails mid-read is an `Err` and never reaches the queue.
pub async fn handle_request<B>(
    req: Request<B>,
    queue: Arc<ExpectationQueue>,
) -> Result<Response<HockBody>, HockError>
where
    B: Body,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();

    // Matching needs the whole payload; a truncated request leaves the queue alone
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = HockError::RequestBody {
                method: parts.method.to_string(),
                url: parts.uri.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            metrics::record_request(parts.method.as_str(), "aborted");
            return Err(err);
        }
    };

    let request = IncomingRequest::from_parts(&parts, &body_bytes);
    dispatch(&queue, request).await
}

/// Dispatch a fully buffered request against the queue.
///
/// Returns `Err` only under the fail-fast policy when nothing matches.
pub async fn dispatch(
    queue: &Arc<ExpectationQueue>,
    request: IncomingRequest,
) -> Result<Response<HockBody>, HockError> {
    let Some(reservation) = queue.reserve(&request) else {
        metrics::record_request(&request.method, "unmatched");
        if let Some(err) = queue.record_unmatched(&request) {
            return Err(err);
        }
        return Ok(text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            NO_MATCH_BODY,
        ));
    };

    if let Some(delay) = reservation.delay() {
        let wait_ms = delay.get_duration_ms();
        if wait_ms > 0 {
            debug!(
                "Delaying reply for {} by {}ms",
                reservation.describe(),
                wait_ms
            );
            metrics::record_delay(wait_ms);
            // Dropping this future here hands the reservation back
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    // Rendered after the delay so a cancelled request leaves stream bodies untouched
    let rendered = reservation.render(&request);
    let body = match rendered.body {
        RenderedBody::Full(bytes) => full_body(bytes),
        RenderedBody::Stream(stream) => stream_body(stream),
        RenderedBody::File(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => stream_body(ReaderStream::new(file)),
            Err(e) => {
                warn!("Failed to open reply file {}: {}", path.display(), e);
                metrics::record_request(&request.method, "aborted");
                return Ok(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to open reply file {}: {e}\n", path.display()),
                ));
            }
        },
    };

    let status =
        StatusCode::from_u16(rendered.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = merge_headers(&queue.default_reply_headers(), rendered.headers);

    let mut response = Response::builder().status(status);
    for (k, v) in &headers {
        response = response.header(k, v);
    }

    let response = match response.body(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("Invalid reply for {}: {}", reservation.describe(), e);
            metrics::record_request(&request.method, "aborted");
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Invalid reply: {e}\n"),
            ));
        }
    };

    let description = reservation.describe().to_string();
    if let Err(e) = reservation.commit() {
        // done() may have cleared the entry while the reply was being built
        warn!("Could not record dispatch of {}: {}", description, e);
    }
    metrics::record_request(&request.method, "matched");

    Ok(response)
}

/// Cloneable entry point for plugging a queue into any hyper server.
#[derive(Clone)]
pub struct Handler {
    queue: Arc<ExpectationQueue>,
}

impl Handler {
    pub fn new(queue: Arc<ExpectationQueue>) -> Self {
        Self { queue }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<HockBody>, HockError>
    where
        B: Body,
        B::Error: Display,
    {
        handle_request(req, Arc::clone(&self.queue)).await
    }
}

impl<B> Service<Request<B>> for Handler
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = Response<HockBody>;
    type Error = HockError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let queue = Arc::clone(&self.queue);
        Box::pin(handle_request(req, queue))
    }
}
