//! Error types for the failover controller core.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// The reconcile loop never propagates these upward: every variant is
/// caught at the call site, logged, and converted into a no-mutation
/// return (see `ReconcileEngine::reconcile`). `Error` exists so that
/// leaf components (`StateStore`, `DnsObserver`) have a shared vocabulary
/// and so startup-time failures (`Config`) can still be fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// Network, timeout, 5xx from a provider, or resolver failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Missing mandatory credentials or unparsable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Record not found or other 4xx from the provider. Stabilization state is preserved.
    #[error("provider logical error: {0}")]
    ProviderLogical(String),

    /// Persisting `OperationalState` failed; in-memory state is retained.
    #[error("state persistence error: {0}")]
    StorePersist(String),

    /// JSON (de)serialization errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem errors from the file-backed state store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn provider_logical(msg: impl Into<String>) -> Self {
        Self::ProviderLogical(msg.into())
    }

    pub fn store_persist(msg: impl Into<String>) -> Self {
        Self::StorePersist(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Classified failure from a `ProviderClient` call, carrying enough detail
/// for the engine to decide how to log it without inspecting transport
/// internals. Maps one-to-one to the kinds in the provider wire contract.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("remote failure: {0}")]
    RemoteFailure(String),
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => Error::ProviderLogical(msg),
            other => Error::Transient(other.to_string()),
        }
    }
}
