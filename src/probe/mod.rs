//! Reachability probing.
//!
//! A probe answers one question about one address: reachable, unreachable,
//! or "something went wrong trying to find out". Anything beyond that
//! contract (ICMP details, latency) is not this crate's concern.

mod ping;

pub use ping::*;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("command failed: {0}")]
    Command(String),
}

/// Outcome of a single reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The address answered within the timeout.
    Reachable,
    /// The address did not answer (no reply or timeout).
    Unreachable,
    /// The probe itself failed to run. Callers treat this as unreachable.
    Error,
}

/// A reachability prober for a single address.
///
/// Implementations must not exceed the given timeout by more than a small
/// margin; the scheduler additionally enforces a hard bound around each call.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome;
}

/// Prober backed by the system `ping` command.
pub struct PingProber;

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome {
        match run_ping_probe(address, timeout).await {
            Ok(true) => ProbeOutcome::Reachable,
            Ok(false) | Err(ProbeError::Timeout(_)) => ProbeOutcome::Unreachable,
            Err(e) => {
                tracing::warn!("Ping probe failed for {}: {}", address, e);
                ProbeOutcome::Error
            }
        }
    }
}
