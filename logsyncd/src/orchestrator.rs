use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, watch};

use crate::storage::{AccessError, BookmarkStore, ScopedLocation, StoreError};
use crate::sync::engine::{
    ContinueOnFailure, PassError, PassOutcome, PassReport, SyncProgress, UploadEngine,
};
use crate::sync::paths::LogFileRules;
use crate::sync::remote::{PresignedUploadClient, UploadRegistryClient};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{picked} has no {expected} directory")]
    WrongDirectory { picked: PathBuf, expected: String },
    #[error("bookmark store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pass(#[from] PassError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Another pass is running; this trigger was dropped.
    Busy,
    NotConnected,
    Pass(PassOutcome),
}

/// User-facing description of the last failed pass. `summary` is a short
/// sentence; `cause` keeps the underlying error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub summary: String,
    pub cause: String,
}

impl SyncFailure {
    fn from_pass_error(err: &PassError) -> Self {
        let summary = match err {
            PassError::Access(_) => "log folder is not accessible",
            PassError::RegistryFetch(_) => "could not check for new files",
            PassError::DestinationRequest(_) | PassError::ProtocolMismatch(_) => {
                "could not prepare uploads"
            }
        };
        Self {
            summary: summary.to_string(),
            cause: err.to_string(),
        }
    }

    fn from_report(report: &PassReport) -> Option<Self> {
        if report.failures.is_empty() {
            return None;
        }
        let cause = report
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.name, failure.reason))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Self {
            summary: format!(
                "{} of {} files failed to upload",
                report.failures.len(),
                report.total
            ),
            cause,
        })
    }
}

/// Bookmarks the log directory found in `picked` and returns its path.
pub fn save_log_folder(
    store: &dyn BookmarkStore,
    rules: &LogFileRules,
    picked: &Path,
) -> Result<PathBuf, SyncError> {
    let log_dir = rules.log_directory_for(picked);
    if !log_dir.is_dir() {
        tracing::warn!(picked = %picked.display(), "picked folder has no log directory");
        return Err(SyncError::WrongDirectory {
            picked: picked.to_path_buf(),
            expected: rules.directory_name().to_string(),
        });
    }
    store.save(&log_dir)?;
    Ok(log_dir)
}

/// Told when a pass uploaded at least one log, so the server-side record
/// list may have changed.
pub trait RecordsChangedListener: Send + Sync {
    fn records_changed(&self, uploaded: &[String]);
}

/// Owns the connected folder and serializes sync passes over it.
pub struct SyncOrchestrator<C> {
    store: Arc<dyn BookmarkStore>,
    rules: LogFileRules,
    engine: Mutex<UploadEngine<C>>,
    progress: watch::Receiver<SyncProgress>,
    location: RwLock<Option<ScopedLocation>>,
    last_error: RwLock<Option<SyncFailure>>,
    listeners: std::sync::RwLock<Vec<Arc<dyn RecordsChangedListener>>>,
}

impl<C> SyncOrchestrator<C>
where
    C: UploadRegistryClient + PresignedUploadClient,
{
    pub fn new(engine: UploadEngine<C>, store: Arc<dyn BookmarkStore>) -> Self {
        let rules = engine.rules().clone();
        let progress = engine.subscribe_progress();
        Self {
            store,
            rules,
            engine: Mutex::new(engine),
            progress,
            location: RwLock::new(None),
            last_error: RwLock::new(None),
            listeners: std::sync::RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RecordsChangedListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.clone()
    }

    pub async fn last_error(&self) -> Option<SyncFailure> {
        self.last_error.read().await.clone()
    }

    pub fn rules(&self) -> &LogFileRules {
        &self.rules
    }

    /// The connected log directory, restored from the bookmark store if this
    /// process has not resolved it yet.
    pub async fn connected_folder(&self) -> Result<Option<ScopedLocation>, SyncError> {
        if let Some(location) = live(self.location.read().await.as_ref()) {
            return Ok(Some(location));
        }
        // The store is read under the write lock so a concurrent disconnect
        // cannot clear it between the load and the cache update.
        let mut slot = self.location.write().await;
        if let Some(location) = live(slot.as_ref()) {
            return Ok(Some(location));
        }
        let restored = self.store.load_active()?;
        if let Some(location) = &restored {
            tracing::info!(
                id = %location.bookmark_id(),
                path = %location.path().display(),
                "restored connected folder"
            );
        }
        slot.clone_from(&restored);
        Ok(restored)
    }

    /// Connects the log directory inside `picked` (or `picked` itself when it
    /// is the log directory). Replaces any previously connected folder.
    pub async fn connect_folder(&self, picked: &Path) -> Result<ScopedLocation, SyncError> {
        let mut slot = self.location.write().await;
        let log_dir = save_log_folder(self.store.as_ref(), &self.rules, picked)?;
        let location = self
            .store
            .load_active()?
            .ok_or(StoreError::NotADirectory(log_dir))?;

        if let Some(previous) = slot.replace(location.clone())
            && previous != location
        {
            previous.revoke();
        }
        drop(slot);
        *self.last_error.write().await = None;
        self.engine.lock().await.reset_cooldown();
        tracing::info!(
            id = %location.bookmark_id(),
            path = %location.path().display(),
            "folder connected"
        );
        Ok(location)
    }

    /// Revokes the connected folder and forgets every saved bookmark. A pass
    /// in flight stops at its next suspension point.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        let mut slot = self.location.write().await;
        if let Some(location) = slot.take() {
            location.revoke();
        }
        self.store.clear_all()?;
        drop(slot);
        *self.last_error.write().await = None;
        tracing::info!("folder disconnected");
        Ok(())
    }

    /// Runs one pass unless another is already running.
    pub async fn trigger_sync(&self) -> Result<TriggerOutcome, SyncError> {
        let Ok(mut engine) = self.engine.try_lock() else {
            tracing::debug!("sync already running, trigger dropped");
            return Ok(TriggerOutcome::Busy);
        };
        let Some(location) = self.connected_folder().await? else {
            return Ok(TriggerOutcome::NotConnected);
        };

        match engine.trigger(&location, &mut ContinueOnFailure).await {
            Ok(outcome) => {
                self.record_outcome(&outcome).await;
                Ok(TriggerOutcome::Pass(outcome))
            }
            Err(PassError::Access(AccessError::Revoked(path))) if location.is_revoked() => {
                tracing::info!(path = %path.display(), "pass abandoned after disconnect");
                Err(PassError::Access(AccessError::Revoked(path)).into())
            }
            Err(err) => {
                let failure = SyncFailure::from_pass_error(&err);
                tracing::warn!(summary = %failure.summary, cause = %failure.cause, "sync failed");
                *self.last_error.write().await = Some(failure);
                Err(err.into())
            }
        }
    }

    async fn record_outcome(&self, outcome: &PassOutcome) {
        let report = match outcome {
            PassOutcome::Completed(report) | PassOutcome::Stopped(report) => report,
            PassOutcome::NothingToDo => {
                *self.last_error.write().await = None;
                return;
            }
            PassOutcome::Suppressed { .. } => return,
        };

        let failure = SyncFailure::from_report(report);
        if let Some(failure) = &failure {
            tracing::warn!(summary = %failure.summary, cause = %failure.cause, "uploads failed");
        }
        *self.last_error.write().await = failure;

        if !report.uploaded.is_empty() {
            self.notify_records_changed(&report.uploaded);
        }
    }

    fn notify_records_changed(&self, uploaded: &[String]) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener.records_changed(uploaded);
        }
    }
}

fn live(location: Option<&ScopedLocation>) -> Option<ScopedLocation> {
    location.filter(|location| !location.is_revoked()).cloned()
}
