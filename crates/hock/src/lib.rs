//! Hock: programmable HTTP stub server for test suites.
//!
//! Register expectations (method, url, optional body and headers, call-count
//! policy, scripted reply), point the code under test at the server, then
//! verify with [`Hock::done`] that every expectation was called often enough.

pub mod config;
pub mod error;
pub mod expectation;
pub mod hock;
pub mod metrics;
pub mod queue;
pub mod server;

pub use crate::config::HockConfig;
pub use crate::error::{HockError, Result};
pub use crate::expectation::{
    CallPolicy, Delay, Expectation, ExpectationSnapshot, IncomingRequest, Method, QueryMatching,
    Reply, ReplyBody,
};
pub use crate::hock::{ExpectationBuilder, Hock};
pub use crate::queue::{ExpectationQueue, UnmatchedPolicy, UnmatchedRequest};
pub use crate::server::{Handler, HockBody};
