//! Expectations: request patterns with call-count policies and scripted replies.
//!
//! ## Module Structure
//!
//! - `types`: methods, call policies, inbound request representation
//! - `filters`: path and body filters applied before matching
//! - `matching`: URL/query and header comparison
//! - `response`: reply bodies, headers and rendering
//! - `delay`: artificial latency before the reply
//! - `core`: the Expectation struct

mod core;
mod delay;
mod filters;
mod matching;
mod response;
mod types;


pub use self::core::{Expectation, ExpectationSnapshot};
pub use delay::Delay;
pub use filters::{Filter, Filters};
pub use matching::{headers_match, parse_query_string, urls_equal, QueryMatching};
pub use response::{
    merge_headers, BodyFn, BodyStream, HeadersFn, RenderedBody, RenderedReply, Reply, ReplyBody,
    ReplyHeaders,
};
pub use types::{CallPolicy, ExpectedBody, IncomingRequest, Method};
