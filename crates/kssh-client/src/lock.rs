//! Exclusive lock over the client's local state.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use kssh_common::lockfile::LockFile;

use crate::error::{ClientError, Result};

/// Default wait for a concurrent kssh to finish with the bundle.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Held for the whole read-or-write of the bundle or the local config.
/// Released on drop.
#[derive(Debug)]
pub struct BundleLock {
    _file: LockFile,
}

impl BundleLock {
    pub async fn acquire(path: PathBuf, timeout: Duration) -> Result<Self> {
        let shown = path.display().to_string();
        let file = tokio::task::spawn_blocking(move || LockFile::acquire(&path, timeout))
            .await
            .map_err(|e| ClientError::Internal(format!("lock task failed: {e}")))?
            .map_err(|e| match e.kind() {
                io::ErrorKind::WouldBlock => ClientError::LockTimeout(shown.clone()),
                _ => ClientError::Io(e),
            })?;
        tracing::trace!(path = %shown, "Bundle lock acquired");
        Ok(Self { _file: file })
    }
}
