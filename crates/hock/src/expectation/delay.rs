//! Delay before a reply is written.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Artificial latency applied after matching and before the reply is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Delay {
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Uniformly random delay within `[min, max]` milliseconds
    Range {
        #[serde(rename = "min")]
        min_ms: u64,
        #[serde(rename = "max")]
        max_ms: u64,
    },
}

impl Delay {
    pub fn from_duration(duration: Duration) -> Self {
        Delay::Fixed(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn get_duration_ms(&self) -> u64 {
        match *self {
            Delay::Fixed(ms) => ms,
            Delay::Range { min_ms, max_ms } if max_ms > min_ms => {
                use rand::Rng;
                rand::thread_rng().gen_range(min_ms..=max_ms)
            }
            Delay::Range { min_ms, .. } => min_ms,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.get_duration_ms())
    }
}

impl From<Duration> for Delay {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}
