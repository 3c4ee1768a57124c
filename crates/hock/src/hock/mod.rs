//! The user-facing hock handle.
//!
//! A [`Hock`] owns one expectation queue and, once [`Hock::listen`] is called,
//! one TCP listener. Expectations are registered through
//! [`ExpectationBuilder`]s returned by the method helpers:
//!
//! ```no_run
//! # async fn demo() -> hock::Result<()> {
//! let hock = hock::Hock::start().await?;
//! hock.get("/url").reply(200, serde_json::json!({"hock": "ok"}))?;
//! // ... drive the code under test against hock.url("/url") ...
//! hock.done()?;
//! # Ok(())
//! # }
//! ```

mod builder;


pub use builder::ExpectationBuilder;

use crate::config::HockConfig;
use crate::error::{HockError, Result};
use crate::expectation::{
    Expectation, ExpectationSnapshot, ExpectedBody, Filter, Method, QueryMatching,
};
use crate::queue::{ExpectationQueue, UnmatchedPolicy, UnmatchedRequest};
use crate::server::{self, Handler, ListenerHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const DEFAULT_HOST: &str = "127.0.0.1";

/// A programmable HTTP stub server.
pub struct Hock {
    queue: Arc<ExpectationQueue>,
    host: String,
    port: u16,
    listener: Mutex<Option<ListenerHandle>>,
}

impl fmt::Debug for Hock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hock")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("address", &self.address())
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Default for Hock {
    fn default() -> Self {
        Self::new()
    }
}

impl Hock {
    /// A hock bound to `127.0.0.1` on an ephemeral port once listening.
    pub fn new() -> Self {
        Self::with_address(DEFAULT_HOST, 0)
    }

    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        Self {
            queue: Arc::new(ExpectationQueue::new()),
            host: host.into(),
            port,
            listener: Mutex::new(None),
        }
    }

    /// Build a hock from a loaded configuration, registering its expectations.
    pub fn with_config(config: &HockConfig) -> Result<Self> {
        let hock = Self::with_address(config.host.clone(), config.port);
        hock.queue.set_unmatched_policy(config.unmatched);
        hock.queue.set_query_matching(config.query_matching);
        hock.default_reply_headers(
            config
                .default_reply_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(ref filter) = config.path_filter {
            hock.filtering_path_regex(&filter.pattern, &filter.replacement)?;
        }
        if let Some(ref filter) = config.body_filter {
            hock.filtering_request_body_regex(&filter.pattern, &filter.replacement)?;
        }
        for expectation in &config.expectations {
            hock.expectation(expectation.to_expectation())
                .respond(expectation.reply.to_reply())?;
        }
        Ok(hock)
    }

    /// Create a hock and start listening on an ephemeral local port.
    pub async fn start() -> Result<Self> {
        let hock = Self::new();
        hock.listen().await?;
        Ok(hock)
    }

    pub async fn start_with_config(config: &HockConfig) -> Result<Self> {
        let hock = Self::with_config(config)?;
        hock.listen().await?;
        Ok(hock)
    }

    pub fn queue(&self) -> &Arc<ExpectationQueue> {
        &self.queue
    }

    /// Service entry point for embedding this hock in another hyper server.
    pub fn handler(&self) -> Handler {
        Handler::new(Arc::clone(&self.queue))
    }

    // ========================================================================
    // Listener
    // ========================================================================

    /// Bind the configured address and start serving. Returns the bound address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.queue.is_closed() {
            return Err(HockError::Listener("server is closed".to_string()));
        }
        if self.listener.lock().is_some() {
            return Err(HockError::Listener("already listening".to_string()));
        }

        let listener = server::bind(&self.host, self.port).await?;
        let handle = server::spawn_accept_loop(listener, self.handler())?;
        let addr = handle.local_addr();

        let mut slot = self.listener.lock();
        if slot.is_some() {
            // Lost a race with a concurrent listen; dropping stops our loop
            return Err(HockError::Listener("already listening".to_string()));
        }
        *slot = Some(handle);
        Ok(addr)
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(ListenerHandle::local_addr)
    }

    /// Absolute URL for `path` on the listening address.
    pub fn url(&self, path: &str) -> Option<String> {
        self.address().map(|addr| format!("http://{addr}{path}"))
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn get(&self, url: impl Into<String>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Get, url))
    }

    pub fn head(&self, url: impl Into<String>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Head, url))
    }

    pub fn delete(&self, url: impl Into<String>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Delete, url))
    }

    pub fn options(&self, url: impl Into<String>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Options, url))
    }

    pub fn put(&self, url: impl Into<String>, body: impl Into<ExpectedBody>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Put, url).with_body(body))
    }

    pub fn patch(&self, url: impl Into<String>, body: impl Into<ExpectedBody>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Patch, url).with_body(body))
    }

    pub fn post(&self, url: impl Into<String>, body: impl Into<ExpectedBody>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Post, url).with_body(body))
    }

    /// The body is stored but never compared: COPY requests match on
    /// method, url and headers only.
    pub fn copy(&self, url: impl Into<String>, body: impl Into<ExpectedBody>) -> ExpectationBuilder<'_> {
        self.builder(Expectation::new(Method::Copy, url).with_body(body))
    }

    pub fn get_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(Expectation::new(Method::Get, url).with_headers(headers))
    }

    pub fn head_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(Expectation::new(Method::Head, url).with_headers(headers))
    }

    pub fn delete_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(Expectation::new(Method::Delete, url).with_headers(headers))
    }

    pub fn options_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(Expectation::new(Method::Options, url).with_headers(headers))
    }

    pub fn put_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        body: impl Into<ExpectedBody>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(
            Expectation::new(Method::Put, url)
                .with_body(body)
                .with_headers(headers),
        )
    }

    pub fn patch_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        body: impl Into<ExpectedBody>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(
            Expectation::new(Method::Patch, url)
                .with_body(body)
                .with_headers(headers),
        )
    }

    pub fn post_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        body: impl Into<ExpectedBody>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(
            Expectation::new(Method::Post, url)
                .with_body(body)
                .with_headers(headers),
        )
    }

    /// See [`Hock::copy`]; the body does not take part in matching.
    pub fn copy_with_headers<K, V>(
        &self,
        url: impl Into<String>,
        body: impl Into<ExpectedBody>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> ExpectationBuilder<'_>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.builder(
            Expectation::new(Method::Copy, url)
                .with_body(body)
                .with_headers(headers),
        )
    }

    /// Start from a fully built expectation.
    pub fn expectation(&self, expectation: Expectation) -> ExpectationBuilder<'_> {
        self.builder(expectation)
    }

    /// Register a fully built expectation. Returns its id.
    pub fn expect(&self, expectation: Expectation) -> Result<u64> {
        builder::validate_reply(expectation.reply())?;
        self.queue.register(expectation)
    }

    fn builder(&self, expectation: Expectation) -> ExpectationBuilder<'_> {
        ExpectationBuilder::new(self, expectation)
    }

    // ========================================================================
    // Queue-level settings
    // ========================================================================

    /// Transform request paths before matching.
    pub fn filtering_path<F>(&self, f: F) -> &Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.queue.set_path_filter(Filter::new(f));
        self
    }

    /// Replace every match of `pattern` in request paths with `replacement`.
    pub fn filtering_path_regex(&self, pattern: &str, replacement: &str) -> Result<&Self> {
        self.queue
            .set_path_filter(Filter::regex(pattern, replacement)?);
        Ok(self)
    }

    /// Transform request bodies before matching.
    pub fn filtering_request_body<F>(&self, f: F) -> &Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.queue.set_body_filter(Filter::new(f));
        self
    }

    pub fn filtering_request_body_regex(&self, pattern: &str, replacement: &str) -> Result<&Self> {
        self.queue
            .set_body_filter(Filter::regex(pattern, replacement)?);
        Ok(self)
    }

    pub fn clear_path_filter(&self) -> &Self {
        self.queue.clear_path_filter();
        self
    }

    pub fn clear_body_filter(&self) -> &Self {
        self.queue.clear_body_filter();
        self
    }

    /// Headers sent with every reply that does not override them.
    pub fn default_reply_headers<K, V>(&self, headers: impl IntoIterator<Item = (K, V)>) -> &Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.queue.set_default_reply_headers(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn unmatched_policy(&self, policy: UnmatchedPolicy) -> &Self {
        self.queue.set_unmatched_policy(policy);
        self
    }

    /// Reply 500 to unmatched requests instead of aborting them.
    pub fn soft_fail(&self) -> &Self {
        self.unmatched_policy(UnmatchedPolicy::SoftFail)
    }

    pub fn query_matching(&self, mode: QueryMatching) -> &Self {
        self.queue.set_query_matching(mode);
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether a request would currently be matched. Nothing is consumed.
    pub fn has_route(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
        headers: Option<&HashMap<String, String>>,
    ) -> bool {
        self.queue.has_route(method.as_str(), url, body, headers)
    }

    pub fn pending(&self) -> Vec<ExpectationSnapshot> {
        self.queue.pending()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn unmatched_requests(&self) -> Vec<UnmatchedRequest> {
        self.queue.unmatched_requests()
    }

    /// Resolves once every pending expectation has been exhausted.
    pub async fn drained(&self) {
        self.queue.drained().await
    }

    pub fn subscribe_drained(&self) -> broadcast::Receiver<()> {
        self.queue.subscribe_drained()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Verify every expectation was called at least its minimum number of times.
    pub fn done(&self) -> Result<()> {
        let result = self.queue.check_done();
        match result {
            Ok(()) => debug!("All expectations satisfied"),
            Err(ref e) => info!("Expectations not met: {}", e),
        }
        result
    }

    /// Like [`Hock::done`], panicking with the error message on failure.
    #[track_caller]
    pub fn assert_done(&self) {
        if let Err(e) = self.done() {
            panic!("{e}");
        }
    }

    pub fn done_with<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>),
    {
        callback(self.done())
    }

    /// Stop listening and refuse further registrations.
    pub async fn close(&self) {
        self.queue.close();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}
