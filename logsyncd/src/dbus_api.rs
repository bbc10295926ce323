use std::path::Path;
use std::sync::Arc;

use logsync_core::LogsyncClient;
use thiserror::Error;
use tokio::sync::mpsc;
use zbus::{interface, object_server::SignalEmitter};

use crate::daemon::TriggerReason;
use crate::ids::{DBUS_ERROR_FAILED, DBUS_ERROR_NOT_CONNECTED, DBUS_ERROR_WRONG_DIRECTORY};
use crate::orchestrator::{RecordsChangedListener, SyncError, SyncOrchestrator, TriggerOutcome};
use crate::storage::ScopedLocation;
use crate::sync::engine::{PassOutcome, SyncProgress};

pub type DaemonOrchestrator = SyncOrchestrator<LogsyncClient>;

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("no log folder is connected")]
    NotConnected,
    #[error("{0}")]
    WrongDirectory(String),
    #[error("{0}")]
    Failed(String),
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::NotConnected => DBUS_ERROR_NOT_CONNECTED,
        DbusServiceError::WrongDirectory(_) => DBUS_ERROR_WRONG_DIRECTORY,
        DbusServiceError::Failed(_) => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: DbusServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

fn map_sync_error(err: SyncError) -> zbus::fdo::Error {
    let message = err.to_string();
    let mapped = match err {
        SyncError::WrongDirectory { .. } => DbusServiceError::WrongDirectory(message),
        _ => DbusServiceError::Failed(message),
    };
    map_to_fdo(mapped)
}

pub fn outcome_label(outcome: &TriggerOutcome) -> &'static str {
    match outcome {
        TriggerOutcome::Busy => "busy",
        TriggerOutcome::NotConnected => "not_connected",
        TriggerOutcome::Pass(PassOutcome::Suppressed { .. }) => "suppressed",
        TriggerOutcome::Pass(PassOutcome::NothingToDo) => "nothing_to_do",
        TriggerOutcome::Pass(PassOutcome::Completed(_)) => "completed",
        TriggerOutcome::Pass(PassOutcome::Stopped(_)) => "stopped",
    }
}

pub fn progress_tuple(progress: &SyncProgress) -> (f64, String, u32, u32, u32) {
    let count = |value: usize| u32::try_from(value).unwrap_or(u32::MAX);
    (
        progress.fraction,
        progress.current_file_label.clone(),
        count(progress.uploaded),
        count(progress.failed),
        count(progress.total),
    )
}

pub struct SyncDbusService {
    orchestrator: Arc<DaemonOrchestrator>,
    triggers: mpsc::UnboundedSender<TriggerReason>,
}

impl SyncDbusService {
    pub fn new(
        orchestrator: Arc<DaemonOrchestrator>,
        triggers: mpsc::UnboundedSender<TriggerReason>,
    ) -> Self {
        Self {
            orchestrator,
            triggers,
        }
    }

    /// Connects `picked` and asks the daemon loop for an immediate pass, which
    /// also moves the folder watch onto the new location.
    pub async fn connect_folder(&self, picked: &Path) -> Result<ScopedLocation, SyncError> {
        let location = self.orchestrator.connect_folder(picked).await?;
        if self.triggers.send(TriggerReason::Connected).is_err() {
            tracing::warn!("daemon loop is gone, first sync waits for restart");
        }
        Ok(location)
    }
}

#[interface(name = "org.logsync.Sync1")]
impl SyncDbusService {
    async fn trigger_sync(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("dbus TriggerSync");
        let outcome = self
            .orchestrator
            .trigger_sync()
            .await
            .map_err(map_sync_error)?;
        Ok(outcome_label(&outcome).to_string())
    }

    async fn connect(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(path, "dbus Connect");
        let location = self
            .connect_folder(Path::new(path))
            .await
            .map_err(map_sync_error)?;
        Ok(location.path().display().to_string())
    }

    async fn disconnect(&self) -> zbus::fdo::Result<()> {
        tracing::info!("dbus Disconnect");
        self.orchestrator
            .disconnect()
            .await
            .map_err(map_sync_error)
    }

    async fn get_connected_folder(&self) -> zbus::fdo::Result<String> {
        match self
            .orchestrator
            .connected_folder()
            .await
            .map_err(map_sync_error)?
        {
            Some(location) => Ok(location.path().display().to_string()),
            None => Err(map_to_fdo(DbusServiceError::NotConnected)),
        }
    }

    async fn get_progress(&self) -> zbus::fdo::Result<(f64, String, u32, u32, u32)> {
        Ok(progress_tuple(&self.orchestrator.progress()))
    }

    async fn get_last_error(&self) -> zbus::fdo::Result<(String, String)> {
        Ok(self
            .orchestrator
            .last_error()
            .await
            .map(|failure| (failure.summary, failure.cause))
            .unwrap_or_default())
    }

    #[zbus(signal)]
    pub async fn records_changed(
        ctxt: &SignalEmitter<'_>,
        uploaded: Vec<String>,
    ) -> zbus::Result<()>;
}

/// Forwards records-changed notifications to the task that owns the D-Bus
/// signal emitter.
pub struct RecordsChangedForwarder {
    tx: mpsc::UnboundedSender<Vec<String>>,
}

impl RecordsChangedForwarder {
    pub fn new(tx: mpsc::UnboundedSender<Vec<String>>) -> Self {
        Self { tx }
    }
}

impl RecordsChangedListener for RecordsChangedForwarder {
    fn records_changed(&self, uploaded: &[String]) {
        let _ = self.tx.send(uploaded.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::PassReport;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn maps_service_errors_to_dbus_names() {
        assert_eq!(
            dbus_error_name(&DbusServiceError::NotConnected),
            "org.logsync.Sync1.Error.NotConnected"
        );
        assert_eq!(
            dbus_error_name(&DbusServiceError::WrongDirectory("x".into())),
            "org.logsync.Sync1.Error.WrongDirectory"
        );
    }

    #[test]
    fn wrong_directory_keeps_its_error_name() {
        let err = map_sync_error(SyncError::WrongDirectory {
            picked: PathBuf::from("/home/me/Downloads"),
            expected: "GPSLogs".into(),
        });
        let zbus::fdo::Error::Failed(message) = err else {
            panic!("unexpected error variant");
        };
        assert!(message.starts_with("org.logsync.Sync1.Error.WrongDirectory: "));
        assert!(message.contains("GPSLogs"));
    }

    #[test]
    fn labels_every_trigger_outcome() {
        assert_eq!(outcome_label(&TriggerOutcome::Busy), "busy");
        assert_eq!(outcome_label(&TriggerOutcome::NotConnected), "not_connected");
        assert_eq!(
            outcome_label(&TriggerOutcome::Pass(PassOutcome::Suppressed {
                remaining: Duration::from_secs(3)
            })),
            "suppressed"
        );
        assert_eq!(
            outcome_label(&TriggerOutcome::Pass(PassOutcome::Completed(
                PassReport::default()
            ))),
            "completed"
        );
    }

    #[test]
    fn progress_tuple_carries_counts() {
        let progress = SyncProgress {
            fraction: 0.5,
            current_file_label: "Mount Hood".into(),
            uploaded: 1,
            failed: 0,
            total: 2,
        };
        assert_eq!(
            progress_tuple(&progress),
            (0.5, "Mount Hood".to_string(), 1, 0, 2)
        );
    }

    #[test]
    fn forwarder_sends_uploaded_names() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        RecordsChangedForwarder::new(tx).records_changed(&["b.slopes".to_string()]);
        assert_eq!(rx.try_recv().unwrap(), vec!["b.slopes".to_string()]);
    }
}
