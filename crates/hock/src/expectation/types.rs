//! Type definitions shared by expectations, the queue and the dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// HTTP Method
// ============================================================================

/// HTTP methods an expectation can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    #[default]
    Get,
    Head,
    Put,
    Patch,
    Post,
    Delete,
    Copy,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Copy => "COPY",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether the request body participates in matching for this method.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Put | Method::Patch | Method::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "COPY" => Ok(Method::Copy),
            "OPTIONS" => Ok(Method::Options),
            other => Err(format!("unsupported method '{other}'")),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

// ============================================================================
// Call-count policy
// ============================================================================

/// How many times an expectation may be consumed.
///
/// `max == None` means unbounded. The explicit flags remember which bound the
/// caller set by hand, so that `min(n)` can stretch an implicit max and
/// `max(n)` can shrink an implicit min, while two explicit bounds that
/// contradict each other are reported by `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub min: usize,
    pub max: Option<usize>,
    min_explicit: bool,
    max_explicit: bool,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            min: 1,
            max: Some(1),
            min_explicit: false,
            max_explicit: false,
        }
    }
}

impl CallPolicy {
    pub fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
            min_explicit: true,
            max_explicit: true,
        }
    }

    pub fn once() -> Self {
        Self::exactly(1)
    }

    pub fn twice() -> Self {
        Self::exactly(2)
    }

    /// At least once, no upper bound.
    pub fn many() -> Self {
        Self {
            min: 1,
            max: None,
            min_explicit: true,
            max_explicit: true,
        }
    }

    /// Zero or more times.
    pub fn any() -> Self {
        Self {
            min: 0,
            max: None,
            min_explicit: true,
            max_explicit: true,
        }
    }

    pub fn set_min(&mut self, n: usize) {
        self.min = n;
        self.min_explicit = true;
        if !self.max_explicit {
            if let Some(max) = self.max {
                self.max = Some(max.max(n));
            }
        }
    }

    /// `None` lifts the upper bound.
    pub fn set_max(&mut self, n: Option<usize>) {
        self.max = n;
        self.max_explicit = true;
        if let Some(max) = n {
            if !self.min_explicit && self.min > max {
                self.min = max;
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    /// Whether `calls` more consumptions are still allowed.
    pub fn allows(&self, calls: usize) -> bool {
        self.max.map_or(true, |max| calls < max)
    }

    pub fn is_exhausted(&self, calls: usize) -> bool {
        !self.allows(calls)
    }

    pub fn is_satisfied(&self, calls: usize) -> bool {
        calls >= self.min
    }
}

impl fmt::Display for CallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{{min: {}, max: {}}}", self.min, max),
            None => write!(f, "{{min: {}, max: unbounded}}", self.min),
        }
    }
}

// ============================================================================
// Request types
// ============================================================================

/// A fully buffered inbound request, as seen by the matcher.
///
/// Header names are lower-cased; repeated headers are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncomingRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl IncomingRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.headers.insert(k.as_ref().to_ascii_lowercase(), v.into());
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Build from hyper request parts and an already collected body.
    pub fn from_parts(parts: &hyper::http::request::Parts, body: &[u8]) -> Self {
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in parts.headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes()).to_string();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Self {
            method: parts.method.as_str().to_string(),
            url,
            headers,
            body: String::from_utf8_lossy(body).to_string(),
        }
    }

    /// Header lookup by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Expected request body, canonicalized to a string at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedBody(String);

impl ExpectedBody {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExpectedBody {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExpectedBody {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<serde_json::Value> for ExpectedBody {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

impl From<&serde_json::Value> for ExpectedBody {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self(s.clone()),
            serde_json::Value::Null => Self::default(),
            other => Self(other.to_string()),
        }
    }
}

impl From<()> for ExpectedBody {
    fn from(_: ()) -> Self {
        Self::default()
    }
}
