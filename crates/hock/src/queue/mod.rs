//! Expectation queue: registration order, atomic match-and-claim, done checks.

mod core;

#[cfg(test)]
mod tests;

pub use self::core::{ExpectationQueue, Reservation, UnmatchedPolicy, UnmatchedRequest};
