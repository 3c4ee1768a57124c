//! Core Expectation struct and implementation.
//!
//! An expectation is one request pattern (method, url, body, headers), its
//! call-count policy and its scripted reply. It carries the bookkeeping the
//! queue needs: how many calls were consumed and how many are in flight.

use super::delay::Delay;
use super::filters::Filters;
use super::matching::{headers_match, urls_equal, QueryMatching};
use super::response::{RenderedReply, Reply};
use super::types::{CallPolicy, ExpectedBody, IncomingRequest, Method};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered request/response pairing.
#[derive(Debug, Clone)]
pub struct Expectation {
    /// Assigned by the queue at registration
    pub(crate) id: u64,
    method: Method,
    url: String,
    body: ExpectedBody,
    /// Lower-cased names
    headers: HashMap<String, String>,
    policy: CallPolicy,
    pub(crate) consumed: usize,
    pub(crate) in_flight: usize,
    reply: Arc<Reply>,
    delay: Option<Delay>,
}

impl Expectation {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            method,
            url: url.into(),
            body: ExpectedBody::default(),
            headers: HashMap::new(),
            policy: CallPolicy::default(),
            consumed: 0,
            in_flight: 0,
            reply: Arc::new(Reply::default()),
            delay: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<ExpectedBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &str {
        self.body.as_str()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    pub fn policy_mut(&mut self) -> &mut CallPolicy {
        &mut self.policy
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn reply(&self) -> &Arc<Reply> {
        &self.reply
    }

    pub fn set_reply(&mut self, reply: Reply) {
        self.reply = Arc::new(reply);
    }

    pub fn delay(&self) -> Option<Delay> {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Option<Delay>) {
        self.delay = delay;
    }

    /// Structural match after filters. Pure: capacity is not considered.
    pub fn is_match(&self, request: &IncomingRequest, filters: &Filters, mode: QueryMatching) -> bool {
        if !request.method.eq_ignore_ascii_case(self.method.as_str()) {
            return false;
        }

        let url = filters.filter_path(&request.url);
        if !urls_equal(&self.url, &url, mode) {
            return false;
        }

        if self.method.carries_body() && filters.filter_body(&request.body) != self.body.as_str() {
            return false;
        }

        headers_match(&self.headers, &request.headers)
    }

    /// Whether another call may be claimed, counting in-flight claims.
    pub fn has_capacity(&self) -> bool {
        self.policy.allows(self.consumed + self.in_flight)
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy.is_exhausted(self.consumed)
    }

    pub fn is_satisfied(&self) -> bool {
        self.policy.is_satisfied(self.consumed)
    }

    pub fn render(&self, request: &IncomingRequest) -> RenderedReply {
        self.reply.render(request)
    }

    /// `METHOD url`, as listed by `done`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn snapshot(&self) -> ExpectationSnapshot {
        ExpectationSnapshot {
            id: self.id,
            method: self.method,
            url: self.url.clone(),
            min: self.policy.min,
            max: self.policy.max,
            consumed: self.consumed,
        }
    }
}

/// Read-only view of a pending expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationSnapshot {
    pub id: u64,
    pub method: Method,
    pub url: String,
    pub min: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    pub consumed: usize,
}
