#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassHealth {
    Healthy,
    Failed { retry_after: Option<Duration> },
    Unchanged,
}

/// Pass-level failures slow the poll down. Per-file failures and triggers
/// that never reached the backend leave the schedule alone.
fn pass_health(result: &Result<TriggerOutcome, SyncError>) -> PassHealth {
    use crate::sync::engine::{PassError, PassOutcome};

    match result {
        Ok(TriggerOutcome::Pass(
            PassOutcome::Completed(_) | PassOutcome::Stopped(_) | PassOutcome::NothingToDo,
        )) => PassHealth::Healthy,
        Ok(_) => PassHealth::Unchanged,
        Err(SyncError::Pass(err)) => {
            let retry_after = match err {
                PassError::RegistryFetch(err) | PassError::DestinationRequest(err) => {
                    err.retry_after_secs().map(Duration::from_secs)
                }
                _ => None,
            };
            PassHealth::Failed { retry_after }
        }
        Err(_) => PassHealth::Unchanged,
    }
}

fn drain_pending(rx: &mut mpsc::UnboundedReceiver<TriggerReason>) -> usize {
    let mut drained = 0;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    drained
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
