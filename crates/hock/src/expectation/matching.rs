//! Structural comparison helpers used by expectation matching.
//!
//! URL comparison is either exact string equality or, for the unordered mode,
//! path equality plus equality of the decoded query parameters compared as a
//! multiset. Header comparison is partial: only names present on both sides
//! are compared.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How query strings are compared when matching URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMatching {
    /// `/p?a=1&b=2` and `/p?b=2&a=1` are different URLs.
    #[default]
    Exact,
    /// Parameter order is ignored.
    Unordered,
}

/// Parse a query string into decoded key/value pairs, sorted so that two
/// permutations of the same parameters compare equal.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            // URL-decode both key and value so %2C and , compare equal
            let decoded_key = urlencoding::decode(key)
                .map(|k| k.into_owned())
                .unwrap_or_else(|_| key.to_string());
            let decoded_value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            (decoded_key, decoded_value)
        })
        .collect();
    pairs.sort();
    pairs
}

/// Split `path?query#fragment` into path and query, dropping any fragment.
fn split_url(url: &str) -> (&str, &str) {
    let url = url.split_once('#').map_or(url, |(before, _)| before);
    url.split_once('?').unwrap_or((url, ""))
}

pub fn urls_equal(expected: &str, actual: &str, mode: QueryMatching) -> bool {
    match mode {
        QueryMatching::Exact => expected == actual,
        QueryMatching::Unordered => {
            let (expected_path, expected_query) = split_url(expected);
            let (actual_path, actual_query) = split_url(actual);
            expected_path == actual_path
                && parse_query_string(expected_query) == parse_query_string(actual_query)
        }
    }
}

/// Partial header match. `expected` keys are already lower-cased.
pub fn headers_match(expected: &HashMap<String, String>, actual: &HashMap<String, String>) -> bool {
    expected.iter().all(|(name, value)| match actual.get(name) {
        Some(actual_value) => actual_value == value,
        None => true,
    })
}
