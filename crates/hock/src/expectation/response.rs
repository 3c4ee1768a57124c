//! Reply definitions and rendering.
//!
//! The body variant is decided once, when the reply is built. Rendering turns
//! a reply into status, headers and a body source for the dispatcher, invoking
//! body and header functions with the matched request.

use super::types::IncomingRequest;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Byte stream used for streamed reply bodies.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Reply body computed from the matched request.
pub type BodyFn = Arc<dyn Fn(&IncomingRequest) -> Bytes + Send + Sync>;

/// Reply headers computed from the matched request.
pub type HeadersFn = Arc<dyn Fn(&IncomingRequest) -> Vec<(String, String)> + Send + Sync>;

// ============================================================================
// Reply body
// ============================================================================

#[derive(Clone, Default)]
pub enum ReplyBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Serialized with `serde_json` when rendered
    Json(serde_json::Value),
    /// Single-use: the first render takes the stream
    Stream(Arc<Mutex<Option<BodyStream>>>),
    /// Opened and streamed on every render
    File(PathBuf),
    Function(BodyFn),
}

impl ReplyBody {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        ReplyBody::Stream(Arc::new(Mutex::new(Some(Box::pin(stream)))))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ReplyBody::File(path.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&IncomingRequest) -> Bytes + Send + Sync + 'static,
    {
        ReplyBody::Function(Arc::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            ReplyBody::Empty => "empty",
            ReplyBody::Bytes(_) => "bytes",
            ReplyBody::Json(_) => "json",
            ReplyBody::Stream(_) => "stream",
            ReplyBody::File(_) => "file",
            ReplyBody::Function(_) => "function",
        }
    }
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            ReplyBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ReplyBody::File(path) => f.debug_tuple("File").field(path).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<&str> for ReplyBody {
    fn from(value: &str) -> Self {
        ReplyBody::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for ReplyBody {
    fn from(value: String) -> Self {
        ReplyBody::Bytes(Bytes::from(value))
    }
}

impl From<Vec<u8>> for ReplyBody {
    fn from(value: Vec<u8>) -> Self {
        ReplyBody::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for ReplyBody {
    fn from(value: Bytes) -> Self {
        ReplyBody::Bytes(value)
    }
}

impl From<serde_json::Value> for ReplyBody {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ReplyBody::Empty,
            serde_json::Value::String(s) => ReplyBody::from(s),
            other => ReplyBody::Json(other),
        }
    }
}

impl From<()> for ReplyBody {
    fn from(_: ()) -> Self {
        ReplyBody::Empty
    }
}

// ============================================================================
// Reply headers
// ============================================================================

#[derive(Clone)]
pub enum ReplyHeaders {
    Fixed(Vec<(String, String)>),
    Function(HeadersFn),
}

impl fmt::Debug for ReplyHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyHeaders::Fixed(headers) => f.debug_tuple("Fixed").field(headers).finish(),
            ReplyHeaders::Function(_) => f.write_str("Function"),
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Scripted response of an expectation.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: ReplyBody,
    /// `None` means the queue's default reply headers are used as-is.
    pub headers: Option<ReplyHeaders>,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: 200,
            body: ReplyBody::Empty,
            headers: None,
        }
    }
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn body(mut self, body: impl Into<ReplyBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&IncomingRequest) -> Bytes + Send + Sync + 'static,
    {
        self.body = ReplyBody::function(f);
        self
    }

    /// Append one header. Replaces a previously installed header function.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = match self.headers.take() {
            Some(ReplyHeaders::Fixed(headers)) => headers,
            _ => Vec::new(),
        };
        headers.push((name.into(), value.into()));
        self.headers = Some(ReplyHeaders::Fixed(headers));
        self
    }

    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = Some(ReplyHeaders::Fixed(
            headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    pub fn headers_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&IncomingRequest) -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.headers = Some(ReplyHeaders::Function(Arc::new(f)));
        self
    }

    /// Render the reply for a matched request.
    pub fn render(&self, request: &IncomingRequest) -> RenderedReply {
        let headers = self.headers.as_ref().map(|headers| match headers {
            ReplyHeaders::Fixed(fixed) => fixed.clone(),
            ReplyHeaders::Function(f) => f(request),
        });

        let body = match &self.body {
            ReplyBody::Empty => RenderedBody::Full(Bytes::new()),
            ReplyBody::Bytes(bytes) => RenderedBody::Full(bytes.clone()),
            ReplyBody::Json(value) => RenderedBody::Full(Bytes::from(value.to_string())),
            ReplyBody::Stream(slot) => match slot.lock().take() {
                Some(stream) => RenderedBody::Stream(stream),
                None => {
                    warn!("Reply stream already consumed, sending empty body");
                    RenderedBody::Full(Bytes::new())
                }
            },
            ReplyBody::File(path) => RenderedBody::File(path.clone()),
            ReplyBody::Function(f) => RenderedBody::Full(f(request)),
        };

        RenderedReply {
            status: self.status,
            headers,
            body,
        }
    }
}

// ============================================================================
// Rendered reply
// ============================================================================

pub enum RenderedBody {
    Full(Bytes),
    Stream(BodyStream),
    File(PathBuf),
}

impl fmt::Debug for RenderedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderedBody::Full(bytes) => f.debug_tuple("Full").field(bytes).finish(),
            RenderedBody::Stream(_) => f.write_str("Stream"),
            RenderedBody::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

#[derive(Debug)]
pub struct RenderedReply {
    pub status: u16,
    pub headers: Option<Vec<(String, String)>>,
    pub body: RenderedBody,
}

/// Merge reply headers over defaults: reply headers win, defaults fill gaps.
pub fn merge_headers(
    defaults: &[(String, String)],
    specific: Option<Vec<(String, String)>>,
) -> Vec<(String, String)> {
    let Some(specific) = specific else {
        return defaults.to_vec();
    };

    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| !specific.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    merged.extend(specific);
    merged
}
