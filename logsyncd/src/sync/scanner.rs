use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::paths::LogFileRules;
use crate::storage::{AccessError, ScopedLocation};

/// A local log file that may need uploading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub full_path: PathBuf,
    pub extension: String,
}

/// Recursively lists the log files under `location`, sorted by file name
/// within each directory. Hidden entries are skipped, as are entries that
/// cannot be read.
pub async fn list_eligible_files(
    location: &ScopedLocation,
    rules: &LogFileRules,
) -> Result<Vec<CandidateFile>, AccessError> {
    let guard = location.begin_access().await?;
    let root = guard.path().to_path_buf();
    let walk_root = root.clone();
    let rules = rules.clone();
    let files = tokio::task::spawn_blocking(move || enumerate(&walk_root, &rules))
        .await
        .map_err(|err| AccessError::Enumerate {
            path: root.clone(),
            source: io::Error::other(err),
        })??;
    drop(guard);
    tracing::debug!(root = %root.display(), eligible = files.len(), "scan finished");
    Ok(files)
}

/// Eligible files whose name the server has not ingested yet, in discovery
/// order. A name found twice locally is only offered once.
pub fn diff(
    eligible: Vec<CandidateFile>,
    already_uploaded: &HashSet<String>,
) -> Vec<CandidateFile> {
    let mut offered = HashSet::new();
    eligible
        .into_iter()
        .filter(|file| !already_uploaded.contains(&file.name))
        .filter(|file| offered.insert(file.name.clone()))
        .collect()
}

fn enumerate(root: &Path, rules: &LogFileRules) -> Result<Vec<CandidateFile>, AccessError> {
    std::fs::read_dir(root).map_err(|source| AccessError::Enumerate {
        path: root.to_path_buf(),
        source,
    })?;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    path = ?err.path(),
                    error = %err,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() || !rules.is_eligible(entry.path()) {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        files.push(CandidateFile {
            name: name.to_string(),
            full_path: entry.path().to_path_buf(),
            extension: rules.extension().to_string(),
        });
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn candidate(name: &str) -> CandidateFile {
        CandidateFile {
            name: name.to_string(),
            full_path: PathBuf::from("/logs/GPSLogs").join(name),
            extension: "slopes".into(),
        }
    }

    fn names(files: &[CandidateFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_only_visible_log_files() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("GPSLogs");
        fs::create_dir_all(logs.join("2024")).unwrap();
        fs::create_dir_all(logs.join(".cache")).unwrap();
        fs::write(logs.join("b.slopes"), b"b").unwrap();
        fs::write(logs.join("a.slopes"), b"a").unwrap();
        fs::write(logs.join("notes.txt"), b"n").unwrap();
        fs::write(logs.join(".hidden.slopes"), b"h").unwrap();
        fs::write(logs.join(".cache/c.slopes"), b"c").unwrap();
        fs::write(logs.join("2024/d.slopes"), b"d").unwrap();

        let location = ScopedLocation::new("id", &logs);
        let files = list_eligible_files(&location, &LogFileRules::default())
            .await
            .unwrap();

        assert_eq!(names(&files), vec!["d.slopes", "a.slopes", "b.slopes"]);
        assert!(files.iter().all(|f| f.extension == "slopes"));
        assert_eq!(location.active_accesses(), 0);
    }

    #[tokio::test]
    async fn revoked_location_is_an_access_error() {
        let dir = tempdir().unwrap();
        let location = ScopedLocation::new("id", dir.path());
        location.revoke();

        let err = list_eligible_files(&location, &LogFileRules::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Revoked(_)));
    }

    #[tokio::test]
    async fn missing_directory_is_an_access_error() {
        let dir = tempdir().unwrap();
        let location = ScopedLocation::new("id", dir.path().join("GPSLogs"));

        let err = list_eligible_files(&location, &LogFileRules::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Denied { .. }));
    }

    #[tokio::test]
    async fn empty_directory_is_not_an_error() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("GPSLogs");
        fs::create_dir_all(&logs).unwrap();

        let files = list_eligible_files(&ScopedLocation::new("id", &logs), &LogFileRules::default())
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn diff_removes_uploaded_names_and_keeps_order() {
        let eligible = vec![candidate("c.slopes"), candidate("a.slopes"), candidate("b.slopes")];
        let uploaded: HashSet<String> = ["a.slopes".to_string()].into_iter().collect();

        let pending = diff(eligible, &uploaded);
        assert_eq!(names(&pending), vec!["c.slopes", "b.slopes"]);
    }

    #[test]
    fn diff_of_fully_uploaded_set_is_empty() {
        let eligible = vec![candidate("a.slopes")];
        let uploaded: HashSet<String> = ["a.slopes".to_string(), "z.slopes".to_string()]
            .into_iter()
            .collect();
        assert!(diff(eligible, &uploaded).is_empty());
    }

    #[test]
    fn diff_offers_duplicate_names_once() {
        let mut nested = candidate("a.slopes");
        nested.full_path = PathBuf::from("/logs/GPSLogs/2024/a.slopes");
        let pending = diff(vec![candidate("a.slopes"), nested], &HashSet::new());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].full_path, PathBuf::from("/logs/GPSLogs/a.slopes"));
    }
}
