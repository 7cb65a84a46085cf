//! Health observation of the primary serving path.

use async_trait::async_trait;

/// Reports whether the primary path is currently healthy enough to serve.
///
/// # Trust Level: Semi-Trusted
///
/// Implementations reach into external infrastructure (a cluster API, a
/// load balancer's status endpoint) the engine does not otherwise depend
/// on. A `HealthProbe` is:
/// - **Allowed** to make read-only calls against its backing system and to
///   apply its own short internal timeout.
/// - **Forbidden** from mutating DNS state, from retrying indefinitely, and
///   from panicking on a backend failure.
///
/// Rationale: per spec.md §4.1, any error talking to the backing system
/// must be treated as "not healthy" (fail closed) rather than surfaced as
/// an `Err` — the engine has no distinct recovery path for a probe error
/// versus a probe-reported unhealthy primary.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True iff the primary path currently meets its health bar.
    async fn primary_healthy(&self) -> bool;
}
