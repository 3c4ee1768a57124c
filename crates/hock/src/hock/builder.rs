use super::Hock;
use crate::error::{HockError, Result};
use crate::expectation::{
    CallPolicy, Delay, Expectation, IncomingRequest, Reply, ReplyBody, ReplyHeaders,
};
use bytes::Bytes;
use futures::Stream;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use std::io;
use std::path::PathBuf;

/// An expectation being configured. Nothing is registered until one of the
/// `reply*` methods or [`ExpectationBuilder::respond`] is called.
#[must_use = "an expectation is only registered once a reply is configured"]
pub struct ExpectationBuilder<'a> {
    hock: &'a Hock,
    expectation: Expectation,
}

impl<'a> ExpectationBuilder<'a> {
    pub(super) fn new(hock: &'a Hock, expectation: Expectation) -> Self {
        Self { hock, expectation }
    }

    pub fn once(self) -> Self {
        self.policy(CallPolicy::once())
    }

    pub fn twice(self) -> Self {
        self.policy(CallPolicy::twice())
    }

    /// At least once, no upper bound.
    pub fn many(self) -> Self {
        self.policy(CallPolicy::many())
    }

    /// Zero or more times.
    pub fn any(self) -> Self {
        self.policy(CallPolicy::any())
    }

    pub fn exactly(self, n: usize) -> Self {
        self.policy(CallPolicy::exactly(n))
    }

    pub fn min(mut self, n: usize) -> Self {
        self.expectation.policy_mut().set_min(n);
        self
    }

    pub fn max(mut self, n: usize) -> Self {
        self.expectation.policy_mut().set_max(Some(n));
        self
    }

    pub fn max_unbounded(mut self) -> Self {
        self.expectation.policy_mut().set_max(None);
        self
    }

    fn policy(mut self, policy: CallPolicy) -> Self {
        *self.expectation.policy_mut() = policy;
        self
    }

    /// Wait before writing the reply.
    pub fn delay(mut self, delay: impl Into<Delay>) -> Self {
        self.expectation.set_delay(Some(delay.into()));
        self
    }

    pub fn reply(self, status: u16, body: impl Into<ReplyBody>) -> Result<&'a Hock> {
        self.respond(Reply::new().status(status).body(body))
    }

    pub fn reply_with_headers<K, V>(
        self,
        status: u16,
        body: impl Into<ReplyBody>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<&'a Hock>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.respond(Reply::new().status(status).body(body).headers(headers))
    }

    /// Stream the file at `path` as the body. The file is opened per request.
    pub fn reply_with_file(self, status: u16, path: impl Into<PathBuf>) -> Result<&'a Hock> {
        self.respond(Reply::new().status(status).body(ReplyBody::file(path)))
    }

    pub fn reply_with_file_and_headers<K, V>(
        self,
        status: u16,
        path: impl Into<PathBuf>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<&'a Hock>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.respond(
            Reply::new()
                .status(status)
                .body(ReplyBody::file(path))
                .headers(headers),
        )
    }

    /// Use `stream` as the body of the first matching request.
    pub fn reply_with_stream<S>(self, status: u16, stream: S) -> Result<&'a Hock>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.respond(Reply::new().status(status).body(ReplyBody::stream(stream)))
    }

    /// Compute the body from the matched request.
    pub fn reply_with_fn<F>(self, status: u16, f: F) -> Result<&'a Hock>
    where
        F: Fn(&IncomingRequest) -> Bytes + Send + Sync + 'static,
    {
        self.respond(Reply::new().status(status).body_fn(f))
    }

    /// Attach `reply` and register the expectation.
    pub fn respond(mut self, reply: Reply) -> Result<&'a Hock> {
        self.expectation.set_reply(reply);
        self.hock.expect(self.expectation)?;
        Ok(self.hock)
    }
}

/// Status and fixed header values must be valid HTTP.
pub(super) fn validate_reply(reply: &Reply) -> Result<()> {
    StatusCode::from_u16(reply.status).map_err(|_| {
        HockError::Configuration(format!("invalid status code {}", reply.status))
    })?;

    if let Some(ReplyHeaders::Fixed(ref headers)) = reply.headers {
        for (name, value) in headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                HockError::Configuration(format!("invalid reply header name {name:?}"))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                HockError::Configuration(format!("invalid value for reply header {name}"))
            })?;
        }
    }
    Ok(())
}
