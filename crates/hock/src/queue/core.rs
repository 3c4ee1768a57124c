//! The expectation queue: ordered pending expectations plus queue-wide settings.
//!
//! All mutable state lives behind one mutex. Matching for dispatch goes
//! through [`ExpectationQueue::reserve`], which finds the first matching
//! expectation with remaining capacity and claims one call on it in the same
//! critical section. The claim is turned into a consumed call by
//! [`Reservation::commit`], or handed back when the reservation is dropped.

use crate::error::{HockError, Result};
use crate::expectation::{
    Delay, Expectation, ExpectationSnapshot, Filter, Filters, IncomingRequest, QueryMatching,
    RenderedReply, Reply,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What the dispatcher does with a request no expectation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Abort the request and surface `UnmatchedRequest` from `done`
    #[default]
    FailFast,
    /// Reply 500 and keep going
    SoftFail,
}

/// An unmatched request kept for diagnosis.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

struct QueueState {
    pending: Vec<Expectation>,
    next_id: u64,
    closed: bool,
    filters: Filters,
    default_reply_headers: Vec<(String, String)>,
    unmatched_policy: UnmatchedPolicy,
    query_matching: QueryMatching,
    unmatched: Vec<UnmatchedRequest>,
    /// First fail-fast miss, reported by `check_done`
    fatal: Option<HockError>,
}

impl QueueState {
    fn position(&self, id: u64) -> Option<usize> {
        self.pending.iter().position(|e| e.id == id)
    }
}

/// Ordered collection of active expectations, owned by one hock instance.
pub struct ExpectationQueue {
    state: Mutex<QueueState>,
    drained_tx: broadcast::Sender<()>,
}

impl Default for ExpectationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpectationQueue {
    pub fn new() -> Self {
        let (drained_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                next_id: 1,
                closed: false,
                filters: Filters::default(),
                default_reply_headers: Vec::new(),
                unmatched_policy: UnmatchedPolicy::default(),
                query_matching: QueryMatching::default(),
                unmatched: Vec::new(),
                fatal: None,
            }),
            drained_tx,
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn set_unmatched_policy(&self, policy: UnmatchedPolicy) {
        self.state.lock().unmatched_policy = policy;
    }

    pub fn unmatched_policy(&self) -> UnmatchedPolicy {
        self.state.lock().unmatched_policy
    }

    pub fn set_query_matching(&self, mode: QueryMatching) {
        self.state.lock().query_matching = mode;
    }

    pub fn set_default_reply_headers(&self, headers: Vec<(String, String)>) {
        self.state.lock().default_reply_headers = headers;
    }

    pub fn default_reply_headers(&self) -> Vec<(String, String)> {
        self.state.lock().default_reply_headers.clone()
    }

    pub fn set_path_filter(&self, filter: Filter) {
        debug!("Path filter set: {:?}", filter);
        self.state.lock().filters.path = Some(filter);
    }

    pub fn clear_path_filter(&self) {
        self.state.lock().filters.path = None;
    }

    pub fn set_body_filter(&self, filter: Filter) {
        debug!("Body filter set: {:?}", filter);
        self.state.lock().filters.body = Some(filter);
    }

    pub fn clear_body_filter(&self) {
        self.state.lock().filters.body = None;
    }

    // ========================================================================
    // Registration and matching
    // ========================================================================

    /// Append an expectation. Returns the id assigned to it.
    pub fn register(&self, mut expectation: Expectation) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(HockError::Configuration(format!(
                "cannot register {} on a closed server",
                expectation.describe()
            )));
        }

        let id = state.next_id;
        state.next_id += 1;
        expectation.id = id;
        debug!(
            "Registered expectation #{} {} {}",
            id,
            expectation.describe(),
            expectation.policy()
        );
        state.pending.push(expectation);
        Ok(id)
    }

    /// First registered, not yet exhausted, structurally matching expectation.
    pub fn find_match(&self, request: &IncomingRequest) -> Option<ExpectationSnapshot> {
        let state = self.state.lock();
        let mode = state.query_matching;
        state
            .pending
            .iter()
            .find(|e| e.has_capacity() && e.is_match(request, &state.filters, mode))
            .map(Expectation::snapshot)
    }

    /// Find a match and claim one call on it, atomically.
    pub fn reserve(self: &Arc<Self>, request: &IncomingRequest) -> Option<Reservation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mode = state.query_matching;
        let filters = &state.filters;

        let expectation = state
            .pending
            .iter_mut()
            .find(|e| e.has_capacity() && e.is_match(request, filters, mode))?;
        expectation.in_flight += 1;
        debug!(
            "Request {} {} matched expectation #{}",
            request.method, request.url, expectation.id
        );

        Some(Reservation {
            queue: Arc::clone(self),
            id: expectation.id,
            description: expectation.describe(),
            reply: Arc::clone(expectation.reply()),
            delay: expectation.delay(),
            committed: false,
        })
    }

    /// Count one consumed call on expectation `id`, removing it at its max.
    pub fn record_dispatch(&self, id: u64) -> Result<()> {
        self.finish_call(id, false)
    }

    fn finish_call(&self, id: u64, reserved: bool) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.position(id).ok_or_else(|| {
            HockError::Configuration(format!("expectation #{id} is no longer pending"))
        })?;

        let expectation = &mut state.pending[index];
        if reserved {
            expectation.in_flight = expectation.in_flight.saturating_sub(1);
        }
        expectation.consumed += 1;

        if expectation.is_exhausted() {
            let removed = state.pending.remove(index);
            debug!(
                "Expectation #{} {} exhausted after {} call(s)",
                id,
                removed.describe(),
                removed.consumed()
            );
            if state.pending.is_empty() {
                info!("Expectation queue drained");
                // No receivers is fine
                let _ = self.drained_tx.send(());
            }
        }
        Ok(())
    }

    fn release(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(index) = state.position(id) {
            let expectation = &mut state.pending[index];
            expectation.in_flight = expectation.in_flight.saturating_sub(1);
            debug!("Released in-flight call on expectation #{}", id);
        }
    }

    /// Log an unmatched request. Returns the error to raise under fail-fast.
    pub fn record_unmatched(&self, request: &IncomingRequest) -> Option<HockError> {
        let mut state = self.state.lock();
        let carries_body = matches!(request.method.as_str(), "PUT" | "PATCH" | "POST");

        state.unmatched.push(UnmatchedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: carries_body.then(|| request.body.clone()),
            timestamp: Utc::now(),
        });

        match state.unmatched_policy {
            UnmatchedPolicy::FailFast => {
                let err = HockError::UnmatchedRequest {
                    method: request.method.clone(),
                    url: request.url.clone(),
                };
                error!("{}", err);
                state.fatal.get_or_insert_with(|| err.clone());
                Some(err)
            }
            UnmatchedPolicy::SoftFail => {
                warn!("No Match For: {} {}", request.method, request.url);
                if carries_body {
                    warn!("Unmatched request body: {}", request.body);
                }
                None
            }
        }
    }

    pub fn unmatched_requests(&self) -> Vec<UnmatchedRequest> {
        self.state.lock().unmatched.clone()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether a request built from these parameters would match, without consuming anything.
    ///
    /// Query parameters are compared regardless of order.
    pub fn has_route(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        headers: Option<&HashMap<String, String>>,
    ) -> bool {
        let mut request = IncomingRequest::new(method, url).with_body(body.unwrap_or_default());
        if let Some(headers) = headers {
            request = request.with_headers(headers.iter().map(|(k, v)| (k, v.clone())));
        }

        let state = self.state.lock();
        state.pending.iter().any(|e| {
            e.has_capacity() && e.is_match(&request, &state.filters, QueryMatching::Unordered)
        })
    }

    pub fn pending(&self) -> Vec<ExpectationSnapshot> {
        self.state
            .lock()
            .pending
            .iter()
            .map(Expectation::snapshot)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver notified each time a dispatch empties the queue.
    pub fn subscribe_drained(&self) -> broadcast::Receiver<()> {
        self.drained_tx.subscribe()
    }

    /// Resolve once the queue holds no pending expectations.
    pub async fn drained(&self) {
        loop {
            let mut rx = {
                let state = self.state.lock();
                if state.pending.is_empty() {
                    return;
                }
                // Subscribed under the lock, so a drain cannot slip in between
                self.drained_tx.subscribe()
            };
            let _ = rx.recv().await;
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Verify every pending expectation reached its minimum.
    ///
    /// On success the satisfied leftovers are cleared. On failure the queue is
    /// left untouched.
    pub fn check_done(&self) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(ref fatal) = state.fatal {
            return Err(fatal.clone());
        }

        let invalid: Vec<String> = state
            .pending
            .iter()
            .filter(|e| !e.policy().is_valid())
            .map(|e| format!("{} has conflicting call policy {}", e.describe(), e.policy()))
            .collect();
        if !invalid.is_empty() {
            return Err(HockError::Configuration(invalid.join("; ")));
        }

        let outstanding: Vec<String> = state
            .pending
            .iter()
            .filter(|e| !e.is_satisfied())
            .map(Expectation::describe)
            .collect();
        if !outstanding.is_empty() {
            return Err(HockError::OutstandingExpectations(outstanding));
        }

        if !state.pending.is_empty() {
            state.pending.clear();
            info!("Expectation queue drained by done check");
            let _ = self.drained_tx.send(());
        }
        Ok(())
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// A claimed call on a matched expectation.
///
/// Dropping it without [`Reservation::commit`] hands the call back.
pub struct Reservation {
    queue: Arc<ExpectationQueue>,
    id: u64,
    description: String,
    reply: Arc<Reply>,
    delay: Option<Delay>,
    committed: bool,
}

impl Reservation {
    pub fn expectation_id(&self) -> u64 {
        self.id
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn delay(&self) -> Option<Delay> {
        self.delay
    }

    pub fn render(&self, request: &IncomingRequest) -> RenderedReply {
        self.reply.render(request)
    }

    /// Record the call as consumed.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.queue.finish_call(self.id, true)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.queue.release(self.id);
        }
    }
}
