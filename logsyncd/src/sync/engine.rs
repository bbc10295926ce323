use std::sync::Arc;
use std::time::{Duration, Instant};

use logsync_core::LogsyncError;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;

use super::cooldown::CooldownWindow;
use super::pass::{ProtocolMismatch, SyncPass};
use super::paths::LogFileRules;
use super::remote::{PresignedUploadClient, UploadDestination, UploadRegistryClient};
use super::scanner::{self, CandidateFile};
use super::transfer::{TransferClient, TransferError};
use crate::storage::{AccessError, ScopedLocation};

pub const NO_NEW_FILES_LABEL: &str = "No new files!";
const DEFAULT_PASS_COOLDOWN: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PassError {
    #[error("folder access failed: {0}")]
    Access(#[from] AccessError),
    #[error("could not fetch uploaded logs: {0}")]
    RegistryFetch(#[source] LogsyncError),
    #[error("could not request upload destinations: {0}")]
    DestinationRequest(#[source] LogsyncError),
    #[error("upload destinations do not match the request: {0}")]
    ProtocolMismatch(#[from] ProtocolMismatch),
}

impl PassError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PassError::Access(err) => err.is_retryable(),
            PassError::RegistryFetch(err) | PassError::DestinationRequest(err) => {
                err.is_retryable()
            }
            PassError::ProtocolMismatch(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    AwaitingDestinations,
    Uploading { cursor: usize, total: usize },
    Cooldown { until: Instant },
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Quiet period after a pass that had work to do.
    pub pass_cooldown: Duration,
    /// Quiet period after a pass that found nothing new.
    pub idle_cooldown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_cooldown: DEFAULT_PASS_COOLDOWN,
            idle_cooldown: DEFAULT_IDLE_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncProgress {
    pub fraction: f64,
    pub current_file_label: String,
    pub uploaded: usize,
    pub failed: usize,
    pub total: usize,
}

impl SyncProgress {
    fn starting(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn nothing_new() -> Self {
        Self {
            fraction: 1.0,
            current_file_label: NO_NEW_FILES_LABEL.to_string(),
            ..Self::default()
        }
    }

    fn processed(&self) -> usize {
        self.uploaded + self.failed
    }

    fn refresh_fraction(&mut self) {
        self.fraction = if self.total == 0 {
            1.0
        } else {
            self.processed() as f64 / self.total as f64
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub uploaded: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// A cooldown window was open; nothing was scanned.
    Suppressed { remaining: Duration },
    /// Every eligible file is already on the server.
    NothingToDo,
    Completed(PassReport),
    /// The observer asked to stop after a failure; the rest of the pass was dropped.
    Stopped(PassReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassControl {
    Continue,
    Stop,
}

pub trait PassObserver: Send {
    fn on_progress(&mut self, _progress: &SyncProgress) {}

    fn on_file_failed(&mut self, _failure: &FileFailure) -> PassControl {
        PassControl::Continue
    }
}

/// Observer that records nothing and never stops a pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContinueOnFailure;

impl PassObserver for ContinueOnFailure {}

enum UploadFailure {
    Revoked(AccessError),
    File(String),
}

pub struct UploadEngine<C> {
    client: Arc<C>,
    transfer: TransferClient,
    rules: LogFileRules,
    config: EngineConfig,
    cooldown: CooldownWindow,
    state: watch::Sender<EngineState>,
    progress: watch::Sender<SyncProgress>,
}

impl<C> UploadEngine<C>
where
    C: UploadRegistryClient + PresignedUploadClient,
{
    pub fn new(client: Arc<C>, rules: LogFileRules) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            client,
            transfer: TransferClient::new(),
            rules,
            config: EngineConfig::default(),
            cooldown: CooldownWindow::default(),
            state,
            progress,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(&self) -> &LogFileRules {
        &self.rules
    }

    /// Current state. A cooldown window that has run out reads as `Idle` and is
    /// republished as such to subscribers.
    pub fn state(&self) -> EngineState {
        self.expire_cooldown_state(Instant::now());
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Drops any open cooldown window so the next trigger scans right away.
    pub fn reset_cooldown(&mut self) {
        self.cooldown.clear();
        if matches!(self.state(), EngineState::Cooldown { .. }) {
            self.state.send_replace(EngineState::Idle);
        }
    }

    /// Runs one sync pass over `location`. Files are uploaded one after the
    /// other; the next PUT starts only once the previous one has finished.
    pub async fn trigger<O>(
        &mut self,
        location: &ScopedLocation,
        observer: &mut O,
    ) -> Result<PassOutcome, PassError>
    where
        O: PassObserver,
    {
        let now = Instant::now();
        if let Some(remaining) = self.cooldown.remaining(now) {
            tracing::debug!(
                remaining_ms = remaining.as_millis() as u64,
                "sync suppressed by cooldown"
            );
            return Ok(PassOutcome::Suppressed { remaining });
        }
        self.cooldown.clear();
        self.expire_cooldown_state(now);

        let result = self.run_pass(location, observer).await;
        match &result {
            Ok(PassOutcome::NothingToDo) => self.enter_cooldown(self.config.idle_cooldown),
            Ok(PassOutcome::Completed(_)) => self.enter_cooldown(self.config.pass_cooldown),
            Ok(PassOutcome::Stopped(_)) | Ok(PassOutcome::Suppressed { .. }) | Err(_) => {
                self.state.send_replace(EngineState::Idle);
            }
        }
        if let Err(err) = &result {
            tracing::warn!(error = %err, "sync pass failed");
        }
        result
    }

    async fn run_pass<O>(
        &mut self,
        location: &ScopedLocation,
        observer: &mut O,
    ) -> Result<PassOutcome, PassError>
    where
        O: PassObserver,
    {
        self.state.send_replace(EngineState::Scanning);
        let already_uploaded = self
            .client
            .fetch_uploaded_names()
            .await
            .map_err(PassError::RegistryFetch)?;
        let eligible = scanner::list_eligible_files(location, &self.rules).await?;
        let eligible_count = eligible.len();
        let pending = scanner::diff(eligible, &already_uploaded);
        tracing::info!(
            eligible = eligible_count,
            uploaded = already_uploaded.len(),
            pending = pending.len(),
            "scan complete"
        );

        if pending.is_empty() {
            let progress = SyncProgress::nothing_new();
            observer.on_progress(&progress);
            self.progress.send_replace(progress);
            return Ok(PassOutcome::NothingToDo);
        }

        self.state.send_replace(EngineState::AwaitingDestinations);
        let names: Vec<String> = pending.iter().map(|file| file.name.clone()).collect();
        let destinations = self
            .client
            .request_destinations(&names)
            .await
            .map_err(PassError::DestinationRequest)?;
        let mut pass = SyncPass::new(pending, destinations)?;

        let mut report = PassReport {
            total: pass.len(),
            ..PassReport::default()
        };
        let mut progress = SyncProgress::starting(pass.len());
        self.progress.send_replace(progress.clone());

        while let Some((file, destination)) = pass.current() {
            self.state.send_replace(EngineState::Uploading {
                cursor: pass.cursor(),
                total: pass.len(),
            });
            progress.current_file_label = self.rules.file_label(&file.name);
            self.progress.send_replace(progress.clone());

            let outcome = self.upload_one(location, file, destination).await;
            let mut control = PassControl::Continue;
            match outcome {
                Ok(()) => {
                    tracing::info!(file = %file.name, "uploaded log");
                    report.uploaded.push(file.name.clone());
                    progress.uploaded += 1;
                }
                Err(UploadFailure::Revoked(err)) => {
                    tracing::warn!(file = %file.name, "folder access revoked during upload");
                    return Err(PassError::Access(err));
                }
                Err(UploadFailure::File(reason)) => {
                    tracing::warn!(file = %file.name, %reason, "log upload failed");
                    let failure = FileFailure {
                        name: file.name.clone(),
                        reason,
                    };
                    control = observer.on_file_failed(&failure);
                    report.failures.push(failure);
                    progress.failed += 1;
                }
            }
            progress.refresh_fraction();
            observer.on_progress(&progress);
            self.progress.send_replace(progress.clone());
            pass.advance();

            if control == PassControl::Stop {
                tracing::info!(
                    processed = pass.cursor(),
                    total = pass.len(),
                    "sync pass stopped by observer"
                );
                return Ok(PassOutcome::Stopped(report));
            }
        }

        let elapsed = OffsetDateTime::now_utc() - pass.started_at();
        tracing::info!(
            uploaded = report.uploaded.len(),
            failed = report.failures.len(),
            total = report.total,
            elapsed_ms = elapsed.whole_milliseconds() as i64,
            "sync pass complete"
        );
        Ok(PassOutcome::Completed(report))
    }

    async fn upload_one(
        &self,
        location: &ScopedLocation,
        file: &CandidateFile,
        destination: &UploadDestination,
    ) -> Result<(), UploadFailure> {
        let guard = match location.begin_access().await {
            Ok(guard) => guard,
            Err(err @ AccessError::Revoked(_)) => return Err(UploadFailure::Revoked(err)),
            Err(err) => return Err(UploadFailure::File(err.to_string())),
        };
        let result = tokio::select! {
            _ = location.revoked() => {
                return Err(UploadFailure::Revoked(AccessError::Revoked(
                    location.path().to_path_buf(),
                )));
            }
            result = self.transfer.upload_file(destination.url.as_str(), &file.full_path) => result,
        };
        drop(guard);
        result.map_err(|err: TransferError| UploadFailure::File(err.to_string()))
    }

    fn expire_cooldown_state(&self, now: Instant) {
        self.state.send_if_modified(|state| match *state {
            EngineState::Cooldown { until } if until <= now => {
                *state = EngineState::Idle;
                true
            }
            _ => false,
        });
    }

    fn enter_cooldown(&mut self, window: Duration) {
        let now = Instant::now();
        self.cooldown.arm(now, window);
        match self.cooldown.expires_at() {
            Some(until) if window > Duration::ZERO => {
                self.state.send_replace(EngineState::Cooldown { until });
            }
            _ => {
                self.state.send_replace(EngineState::Idle);
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
