use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use logsync_core::LogsyncClient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::dbus_api::{DaemonOrchestrator, RecordsChangedForwarder, SyncDbusService, outcome_label};
use crate::ids::{DBUS_NAME_SYNC, DBUS_OBJECT_PATH_SYNC};
use crate::orchestrator::{SyncError, SyncOrchestrator, TriggerOutcome};
use crate::storage::{BookmarkStore, FileBookmarkStore, ScopedLocation};
use crate::sync::backoff::Backoff;
use crate::sync::engine::{EngineConfig, UploadEngine};
use crate::sync::local_watcher::start_notify_watcher;
use crate::sync::paths::{DEFAULT_LOG_DIR_NAME, DEFAULT_LOG_EXTENSION, LogFileRules};
use crate::sync::transfer::{TransferClient, TransferConfig};

const DEFAULT_API_URL: &str = "http://localhost:4000";
const DEFAULT_POLL_SECS: u64 = 300;
const DEFAULT_MAX_POLL_SECS: u64 = 3600;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_IDLE_COOLDOWN_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;
const WATCH_SETTLE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub bookmark_dir: Option<PathBuf>,
    pub log_extension: String,
    pub log_dir_name: String,
    pub poll_interval: Duration,
    pub pass_cooldown: Duration,
    pub idle_cooldown: Duration,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub enable_watcher: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let api_url = read_string_env("LOGSYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let token = read_string_env("LOGSYNC_TOKEN");
        let bookmark_dir =
            read_string_env("LOGSYNC_BOOKMARK_DIR").map(|value| expand_with_home(&value, &home));
        let log_extension = read_string_env("LOGSYNC_LOG_EXTENSION")
            .unwrap_or_else(|| DEFAULT_LOG_EXTENSION.into());
        let log_dir_name =
            read_string_env("LOGSYNC_LOG_DIR_NAME").unwrap_or_else(|| DEFAULT_LOG_DIR_NAME.into());
        let poll_interval =
            Duration::from_secs(read_u64_env("LOGSYNC_POLL_SECS", DEFAULT_POLL_SECS));
        let pass_cooldown =
            Duration::from_secs(read_u64_env("LOGSYNC_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS));
        let idle_cooldown = Duration::from_secs(read_u64_env(
            "LOGSYNC_IDLE_COOLDOWN_SECS",
            DEFAULT_IDLE_COOLDOWN_SECS,
        ));
        let request_timeout = Duration::from_secs(read_u64_env(
            "LOGSYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));
        let upload_timeout = Duration::from_secs(read_u64_env(
            "LOGSYNC_UPLOAD_TIMEOUT_SECS",
            DEFAULT_UPLOAD_TIMEOUT_SECS,
        ));
        let enable_watcher = read_bool_env("LOGSYNC_ENABLE_WATCHER", true);

        Ok(Self {
            api_url,
            token,
            bookmark_dir,
            log_extension,
            log_dir_name,
            poll_interval,
            pass_cooldown,
            idle_cooldown,
            request_timeout,
            upload_timeout,
            enable_watcher,
        })
    }

    pub fn rules(&self) -> LogFileRules {
        LogFileRules::new(&self.log_extension, &self.log_dir_name)
    }

    pub fn open_store(&self) -> anyhow::Result<FileBookmarkStore> {
        let store = match &self.bookmark_dir {
            Some(dir) => FileBookmarkStore::open(dir),
            None => FileBookmarkStore::open_default(),
        };
        store.context("failed to open bookmark store")
    }
}

/// Why the daemon loop is about to run a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Launch,
    Poll,
    FolderChanged,
    /// A folder was just connected over D-Bus.
    Connected,
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    orchestrator: Arc<DaemonOrchestrator>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let token = config.token.clone().context("LOGSYNC_TOKEN is not set")?;
        let client = LogsyncClient::with_base_url(&config.api_url, token)
            .context("invalid LOGSYNC_API_URL")?
            .with_timeout(config.request_timeout)
            .context("failed to build http client")?;
        let store: Arc<dyn BookmarkStore> = Arc::new(config.open_store()?);
        let transfer = TransferClient::with_config(TransferConfig {
            upload_timeout: config.upload_timeout,
            ..TransferConfig::default()
        });
        let engine = UploadEngine::new(Arc::new(client), config.rules())
            .with_transfer(transfer)
            .with_config(EngineConfig {
                pass_cooldown: config.pass_cooldown,
                idle_cooldown: config.idle_cooldown,
            });
        let orchestrator = Arc::new(SyncOrchestrator::new(engine, store));

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            api_url = %self.config.api_url,
            poll_secs = self.config.poll_interval.as_secs(),
            watcher = self.config.enable_watcher,
            "logsyncd started"
        );

        let (records_tx, mut records_rx) = mpsc::unbounded_channel::<Vec<String>>();
        self.orchestrator
            .add_listener(Arc::new(RecordsChangedForwarder::new(records_tx)));

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<TriggerReason>();
        let _ = trigger_tx.send(TriggerReason::Launch);

        let dbus_connection = match ConnectionBuilder::session()
            .and_then(|builder| builder.name(DBUS_NAME_SYNC))
            .and_then(|builder| {
                builder.serve_at(
                    DBUS_OBJECT_PATH_SYNC,
                    SyncDbusService::new(Arc::clone(&self.orchestrator), trigger_tx.clone()),
                )
            }) {
            Ok(builder) => match builder.build().await {
                Ok(connection) => Some(connection),
                Err(err) => {
                    tracing::warn!(error = %err, "D-Bus service unavailable");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "D-Bus service unavailable");
                None
            }
        };

        let signal_handle = match &dbus_connection {
            Some(connection) => {
                let emitter = SignalEmitter::new(connection, DBUS_OBJECT_PATH_SYNC)
                    .context("failed to create D-Bus signal emitter")?
                    .into_owned();
                Some(tokio::spawn(async move {
                    while let Some(uploaded) = records_rx.recv().await {
                        if let Err(err) =
                            SyncDbusService::records_changed(&emitter, uploaded).await
                        {
                            tracing::warn!(error = %err, "failed to emit RecordsChanged");
                        }
                    }
                }))
            }
            None => None,
        };

        let mut backoff = Backoff::new(
            self.config.poll_interval,
            Duration::from_secs(DEFAULT_MAX_POLL_SECS).max(self.config.poll_interval),
            true,
        );
        let mut folder_watch: Option<FolderWatch> = None;

        loop {
            let delay = backoff.next_delay();
            let reason = tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res.context("failed waiting for shutdown signal")?;
                    break;
                }
                _ = tokio::time::sleep(delay) => TriggerReason::Poll,
                Some(reason) = trigger_rx.recv() => reason,
            };
            if reason == TriggerReason::FolderChanged {
                tokio::time::sleep(WATCH_SETTLE).await;
                drain_pending(&mut trigger_rx);
            }

            let result = self.orchestrator.trigger_sync().await;
            log_trigger_result(reason, &result);
            match pass_health(&result) {
                PassHealth::Healthy => backoff.record_success(),
                PassHealth::Failed { retry_after } => {
                    backoff.record_failure(retry_after);
                    tracing::debug!(
                        failures = backoff.failures(),
                        retry_after_secs = retry_after.map(|delay| delay.as_secs()),
                        "next poll backed off"
                    );
                }
                PassHealth::Unchanged => {}
            }

            if self.config.enable_watcher {
                let location = self.orchestrator.connected_folder().await.ok().flatten();
                refresh_folder_watch(
                    &mut folder_watch,
                    location.as_ref(),
                    self.orchestrator.rules(),
                    &trigger_tx,
                );
            }
        }

        tracing::info!("shutting down");
        drop(folder_watch);
        if let Some(handle) = signal_handle {
            handle.abort();
        }
        Ok(())
    }
}

/// Watcher on the connected folder plus the task that turns its events into
/// sync triggers.
struct FolderWatch {
    path: PathBuf,
    _watcher: notify::RecommendedWatcher,
    forward: JoinHandle<()>,
}

impl Drop for FolderWatch {
    fn drop(&mut self) {
        self.forward.abort();
    }
}

fn refresh_folder_watch(
    current: &mut Option<FolderWatch>,
    location: Option<&ScopedLocation>,
    rules: &LogFileRules,
    trigger_tx: &mpsc::UnboundedSender<TriggerReason>,
) {
    let wanted = location.map(|location| location.path());
    if current.as_ref().map(|watch| watch.path.as_path()) == wanted {
        return;
    }
    *current = None;
    let Some(path) = wanted else {
        return;
    };
    match start_folder_watch(path, rules, trigger_tx.clone()) {
        Ok(watch) => *current = Some(watch),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to watch log folder");
        }
    }
}

fn start_folder_watch(
    path: &Path,
    rules: &LogFileRules,
    trigger_tx: mpsc::UnboundedSender<TriggerReason>,
) -> notify::Result<FolderWatch> {
    let (watcher, mut rx) = start_notify_watcher(path, rules.clone())?;
    let forward = tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            tracing::debug!(path = %change.path.display(), "log folder changed");
            if trigger_tx.send(TriggerReason::FolderChanged).is_err() {
                break;
            }
        }
    });
    Ok(FolderWatch {
        path: path.to_path_buf(),
        _watcher: watcher,
        forward,
    })
}

fn log_trigger_result(reason: TriggerReason, result: &Result<TriggerOutcome, SyncError>) {
    match result {
        Ok(outcome) => {
            tracing::debug!(?reason, outcome = outcome_label(outcome), "sync trigger handled");
        }
        Err(err) => tracing::warn!(?reason, error = %err, "sync trigger failed"),
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
