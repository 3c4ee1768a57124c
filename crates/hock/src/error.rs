//! Error types for hock.

/// Errors surfaced by the expectation queue, the dispatcher and the listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HockError {
    /// Conflicting call policy, registration on a closed queue, bad status code, bad filter.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request arrived that no expectation accepts (fail-fast policy only).
    #[error("No Match For: {method} {url}")]
    UnmatchedRequest { method: String, url: String },

    /// `done` found expectations that were called fewer than `min` times.
    #[error("Unprocessed Requests in Assertions Queue: {}", .0.join(", "))]
    OutstandingExpectations(Vec<String>),

    /// The request body could not be read in full; the request is dropped unmatched.
    #[error("Failed to read request body for {method} {url}: {reason}")]
    RequestBody {
        method: String,
        url: String,
        reason: String,
    },

    /// Bind failure or a second `listen` on the same instance.
    #[error("Listener error: {0}")]
    Listener(String),
}

/// Result type alias for hock operations.
pub type Result<T> = std::result::Result<T, HockError>;
