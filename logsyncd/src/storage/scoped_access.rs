use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("access to {path} was denied: {source}")]
    Denied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("access to {0} was revoked")]
    Revoked(PathBuf),
    #[error("cannot enumerate {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AccessError {
    /// Denied access may succeed on a later attempt; a revoked location never will.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AccessError::Revoked(_))
    }
}

/// Usable handle to a bookmarked directory.
///
/// Reading under the directory requires an [`AccessGuard`] from
/// [`ScopedLocation::begin_access`]; access ends when the guard is dropped.
/// Clones share revocation and the live-guard counter.
#[derive(Debug, Clone)]
pub struct ScopedLocation {
    bookmark_id: String,
    path: PathBuf,
    revoked: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl ScopedLocation {
    pub fn new(bookmark_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            bookmark_id: bookmark_id.into(),
            path: path.into(),
            revoked: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn bookmark_id(&self) -> &str {
        &self.bookmark_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn begin_access(&self) -> Result<AccessGuard, AccessError> {
        if self.revoked.is_cancelled() {
            return Err(AccessError::Revoked(self.path.clone()));
        }
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| AccessError::Denied {
                path: self.path.clone(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(AccessError::Denied {
                path: self.path.clone(),
                source: io::Error::other("not a directory"),
            });
        }
        let live = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(path = %self.path.display(), live, "scoped access started");
        Ok(AccessGuard {
            path: self.path.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn revoke(&self) {
        if !self.revoked.is_cancelled() {
            tracing::info!(path = %self.path.display(), "folder access revoked");
        }
        self.revoked.cancel();
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_cancelled()
    }

    /// Resolves once the location is revoked.
    pub async fn revoked(&self) {
        self.revoked.cancelled().await
    }

    pub fn active_accesses(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl PartialEq for ScopedLocation {
    fn eq(&self, other: &Self) -> bool {
        self.bookmark_id == other.bookmark_id && self.path == other.path
    }
}

#[derive(Debug)]
pub struct AccessGuard {
    path: PathBuf,
    active: Arc<AtomicUsize>,
}

impl AccessGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        let live = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::trace!(path = %self.path.display(), live, "scoped access ended");
    }
}
