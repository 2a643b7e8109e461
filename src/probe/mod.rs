//! Probe module for availability monitoring.
//!
//! Supports HTTP service probes and ICMP connectivity probes.

mod http;
mod ping;

pub use http::*;
pub use ping::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The target could not be reached; the probe still yields a sample.
    #[error("transport error: {0}")]
    Transport(String),
    /// Anything else. Ends the worker that hit it.
    #[error("unexpected probe failure: {0}")]
    Unexpected(String),
}

/// How long to wait before the next cycle so cycles start no closer than `cadence`.
///
/// Zero when the cycle already took at least `cadence`.
pub fn remaining_cadence(cadence: Duration, spent: Duration) -> Duration {
    cadence.saturating_sub(spent)
}
