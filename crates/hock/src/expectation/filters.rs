//! Path and body filters applied to incoming requests before matching.

use crate::error::HockError;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// A pure string transformation applied to an incoming URL or body.
#[derive(Clone)]
pub struct Filter {
    f: Arc<dyn Fn(&str) -> String + Send + Sync>,
    label: String,
}

impl Filter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            label: "fn".to_string(),
        }
    }

    /// Replace every match of `pattern` with `replacement` (`$1`-style groups allowed).
    pub fn regex(pattern: &str, replacement: &str) -> Result<Self, HockError> {
        let re = Regex::new(pattern)
            .map_err(|e| HockError::Configuration(format!("invalid filter regex '{pattern}': {e}")))?;
        let replacement = replacement.to_string();
        let label = format!("regex({pattern} -> {replacement})");
        Ok(Self {
            f: Arc::new(move |input: &str| re.replace_all(input, replacement.as_str()).into_owned()),
            label,
        })
    }

    pub fn apply(&self, input: &str) -> String {
        (self.f)(input)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("label", &self.label).finish()
    }
}

/// The filters active on a queue at match time.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub path: Option<Filter>,
    pub body: Option<Filter>,
}

impl Filters {
    pub fn filter_path<'a>(&self, url: &'a str) -> std::borrow::Cow<'a, str> {
        match self.path {
            Some(ref filter) => filter.apply(url).into(),
            None => url.into(),
        }
    }

    pub fn filter_body<'a>(&self, body: &'a str) -> std::borrow::Cow<'a, str> {
        match self.body {
            Some(ref filter) => filter.apply(body).into(),
            None => body.into(),
        }
    }
}
