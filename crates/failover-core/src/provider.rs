//! Authoritative DNS provider contract.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::state::DnsTarget;

/// A DNS record as reported by the provider API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub proxied: bool,
}

/// Reads and writes the single managed hostname's record at the
/// authoritative DNS provider.
///
/// # Trust Level: Trusted
///
/// `ProviderClient` is the only component `ReconcileEngine` treats as
/// ground truth for drift correction (spec.md §4.5 step 2). It is:
/// - **Allowed** to perform network I/O against the provider's HTTP API,
///   subject to a 10-second timeout per call.
/// - **Forbidden** from retrying internally beyond what a single HTTP
///   client attempt does — retry/backoff policy belongs to the engine's
///   tick cadence, not the client.
///
/// Rationale: `set_target` must be idempotent (spec.md §4.3) so that a
/// crash between "decided to commit" and "confirmed the write" is safe to
/// retry on the next tick without side effects beyond the intended one.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch the first record matching the full hostname, if any.
    async fn get_record(&self, hostname: &str) -> Result<Option<Record>, ProviderError>;

    /// Classify the current record against the known targets.
    async fn read_target(&self, hostname: &str) -> Result<DnsTarget, ProviderError>;

    /// Idempotently point `hostname` at `target`.
    async fn set_target(&self, hostname: &str, target: DnsTarget) -> Result<(), ProviderError>;
}
