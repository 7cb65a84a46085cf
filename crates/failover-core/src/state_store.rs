//! Durable storage for `OperationalState`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::state::OperationalState;

/// Current on-disk schema version. Bumped only if the wire shape in
/// spec.md §6 ever changes incompatibly.
const STATE_FILE_VERSION: u32 = 1;

/// Durable read/write of `OperationalState`.
///
/// # Trust Level: Trusted
///
/// `OperationalStateStore` implementations are invoked only by
/// `ReconcileEngine` under its single mutual-exclusion scope. A store must
/// never retry, rate-limit, or otherwise make scheduling decisions of its
/// own — that is the engine's job. A store may fail `save`; the engine
/// treats that as logged-and-ignored, never fatal (spec.md §4.4).
#[async_trait]
pub trait OperationalStateStore: Send + Sync {
    /// Load the persisted state. Missing or unparseable state is not an
    /// error: implementations return a fresh `OperationalState::initial`.
    async fn load(&self) -> Result<OperationalState>;

    /// Persist the given state. Implementations may fail (disk full,
    /// permission denied); the caller does not treat that as fatal.
    async fn save(&self, state: &OperationalState) -> Result<()>;
}

/// In-memory store. State does not survive process restart.
#[derive(Debug, Default)]
pub struct MemoryOperationalStateStore {
    inner: Mutex<Option<OperationalState>>,
}

impl MemoryOperationalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(state: OperationalState) -> Self {
        Self {
            inner: Mutex::new(Some(state)),
        }
    }
}

#[async_trait]
impl OperationalStateStore for MemoryOperationalStateStore {
    async fn load(&self) -> Result<OperationalState> {
        let guard = self.inner.lock().expect("state mutex poisoned");
        Ok(guard.clone().unwrap_or_else(|| OperationalState::initial(chrono::Utc::now())))
    }

    async fn save(&self, state: &OperationalState) -> Result<()> {
        let mut guard = self.inner.lock().expect("state mutex poisoned");
        *guard = Some(state.clone());
        Ok(())
    }
}

/// File-backed store with atomic writes.
///
/// Saves write to a temporary sibling file, then rename it over the target
/// (atomic on the same filesystem), and keep the previous contents at
/// `<path>.backup`. Loads that hit a parse error fall back to the backup
/// before giving up and returning the default initial state.
#[derive(Debug)]
pub struct FileOperationalStateStore {
    path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct OnDisk {
    version: u32,
    #[serde(flatten)]
    state: OperationalState,
}

impl FileOperationalStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn backup_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        let name = format!(
            "{}.backup",
            p.file_name().and_then(|s| s.to_str()).unwrap_or("state")
        );
        p.set_file_name(name);
        p
    }

    fn parse(bytes: &[u8]) -> std::result::Result<OperationalState, serde_json::Error> {
        let on_disk: OnDisk = serde_json::from_slice(bytes)?;
        Ok(on_disk.state)
    }

    async fn read_path(path: &Path) -> Option<OperationalState> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match Self::parse(&bytes) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file corrupt");
                None
            }
        }
    }
}

#[async_trait]
impl OperationalStateStore for FileOperationalStateStore {
    async fn load(&self) -> Result<OperationalState> {
        if let Some(state) = Self::read_path(&self.path).await {
            return Ok(state);
        }

        if let Some(state) = Self::read_path(&self.backup_path()).await {
            tracing::warn!(path = %self.path.display(), "recovered state from backup");
            return Ok(state);
        }

        tracing::warn!(
            path = %self.path.display(),
            "no usable state found, starting from initial state"
        );
        Ok(OperationalState::initial(chrono::Utc::now()))
    }

    async fn save(&self, state: &OperationalState) -> Result<()> {
        let on_disk = OnDisk {
            version: STATE_FILE_VERSION,
            state: state.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&on_disk)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let _ = tokio::fs::copy(&self.path, self.backup_path()).await;
        }

        let tmp_path = {
            let mut p = self.path.clone();
            let name = format!(
                "{}.tmp",
                p.file_name().and_then(|s| s.to_str()).unwrap_or("state")
            );
            p.set_file_name(name);
            p
        };

        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
