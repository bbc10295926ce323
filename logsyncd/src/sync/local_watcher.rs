use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::paths::LogFileRules;

/// A log file appeared or changed in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChange {
    pub path: PathBuf,
}

pub fn start_notify_watcher(
    root: &Path,
    rules: LogFileRules,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FolderChange>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for change in map_event(&rules, event) {
                let _ = tx.send(change);
            }
        }
        Err(err) => tracing::warn!(error = %err, "folder watcher error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::debug!(root = %root.display(), "watching log folder");
    Ok((watcher, rx))
}

/// Keeps creations, writes and renames of log files. Removals never produce
/// new uploads and are dropped.
fn map_event(rules: &LogFileRules, event: Event) -> Vec<FolderChange> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .into_iter()
            .filter(|path| rules.is_eligible(path))
            .map(|path| FolderChange { path })
            .collect(),
        _ => Vec::new(),
    }
}
