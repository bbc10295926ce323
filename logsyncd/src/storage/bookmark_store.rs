use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::scoped_access::ScopedLocation;

const BOOKMARK_EXTENSION: &str = "bookmark";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bookmark encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("timestamp formatting error: {0}")]
    Time(#[from] time::error::Format),
    #[error("local data directory is unavailable")]
    MissingDataDir,
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("bookmark store lock is poisoned")]
    Poisoned,
}

/// Durable, revalidatable pointer to a user-granted directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedBookmark {
    pub id: String,
    pub encoded_location: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BookmarkRecord {
    location: PathBuf,
    saved_at: String,
}

impl ScopedBookmark {
    fn encode(id: String, location: &Path) -> Result<Self, StoreError> {
        let record = BookmarkRecord {
            location: location.to_path_buf(),
            saved_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
        };
        Ok(Self {
            id,
            encoded_location: serde_json::to_vec(&record)?,
        })
    }

    fn decode(&self) -> Result<BookmarkRecord, StoreError> {
        Ok(serde_json::from_slice(&self.encoded_location)?)
    }
}

/// Persists the single active folder bookmark.
pub trait BookmarkStore: Send + Sync {
    /// Saves a bookmark for `location` and returns its id. Saving the folder
    /// that is already bookmarked returns the existing id; saving a different
    /// folder replaces the previous bookmark.
    fn save(&self, location: &Path) -> Result<String, StoreError>;

    /// Resolves the most recently saved bookmark. Stale bookmarks resolve to
    /// `None`.
    fn load_active(&self) -> Result<Option<ScopedLocation>, StoreError>;

    fn clear_all(&self) -> Result<(), StoreError>;
}

pub struct FileBookmarkStore {
    root: PathBuf,
}

impl FileBookmarkStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "bookmark store opened");
        Ok(Self { root })
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(default_store_dir()?)
    }

    pub fn close(self) {
        tracing::debug!(root = %self.root.display(), "bookmark store closed");
    }

    fn read_all(&self) -> Result<Vec<ScopedBookmark>, StoreError> {
        let mut bookmarks = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BOOKMARK_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read(&path) {
                Ok(encoded_location) => bookmarks.push(ScopedBookmark {
                    id: id.to_string(),
                    encoded_location,
                }),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "unreadable bookmark skipped"
                    );
                }
            }
        }
        Ok(bookmarks)
    }

    fn write_atomic(&self, bookmark: &ScopedBookmark) -> Result<(), StoreError> {
        let target = self.bookmark_path(&bookmark.id);
        let partial = self.root.join(format!(".{}.partial", bookmark.id));
        {
            let mut file = fs::File::create(&partial)?;
            file.write_all(&bookmark.encoded_location)?;
            file.sync_all()?;
        }
        fs::rename(&partial, &target)?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.bookmark_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn bookmark_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{BOOKMARK_EXTENSION}"))
    }
}

impl BookmarkStore for FileBookmarkStore {
    fn save(&self, location: &Path) -> Result<String, StoreError> {
        let target = canonical_directory(location)?;
        let existing = self.read_all()?;
        if let Some(id) = find_for_target(&existing, &target) {
            for other in existing.iter().filter(|b| b.id != id) {
                self.remove(&other.id)?;
            }
            tracing::debug!(id = %id, location = %target.display(), "folder already bookmarked");
            return Ok(id);
        }

        let bookmark = ScopedBookmark::encode(generate_id(), &target)?;
        self.write_atomic(&bookmark)?;
        for old in &existing {
            self.remove(&old.id)?;
        }
        tracing::info!(id = %bookmark.id, location = %target.display(), "bookmark saved");
        Ok(bookmark.id)
    }

    fn load_active(&self) -> Result<Option<ScopedLocation>, StoreError> {
        Ok(resolve_latest(&self.read_all()?))
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        for bookmark in self.read_all()? {
            self.remove(&bookmark.id)?;
        }
        tracing::info!(root = %self.root.display(), "all bookmarks removed");
        Ok(())
    }
}

/// Bookmark store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryBookmarkStore {
    bookmarks: Mutex<Vec<ScopedBookmark>>,
}

impl MemoryBookmarkStore {
    pub fn len(&self) -> usize {
        self.bookmarks.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BookmarkStore for MemoryBookmarkStore {
    fn save(&self, location: &Path) -> Result<String, StoreError> {
        let target = canonical_directory(location)?;
        let mut bookmarks = self.bookmarks.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(id) = find_for_target(&bookmarks, &target) {
            bookmarks.retain(|b| b.id == id);
            return Ok(id);
        }
        let bookmark = ScopedBookmark::encode(generate_id(), &target)?;
        let id = bookmark.id.clone();
        *bookmarks = vec![bookmark];
        Ok(id)
    }

    fn load_active(&self) -> Result<Option<ScopedLocation>, StoreError> {
        let bookmarks = self.bookmarks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(resolve_latest(&bookmarks))
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        self.bookmarks
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .clear();
        Ok(())
    }
}

fn canonical_directory(location: &Path) -> Result<PathBuf, StoreError> {
    let target = fs::canonicalize(location)?;
    if !target.is_dir() {
        return Err(StoreError::NotADirectory(target));
    }
    Ok(target)
}

fn find_for_target(bookmarks: &[ScopedBookmark], target: &Path) -> Option<String> {
    bookmarks
        .iter()
        .find(|b| b.decode().is_ok_and(|record| record.location == target))
        .map(|b| b.id.clone())
}

fn resolve_latest(bookmarks: &[ScopedBookmark]) -> Option<ScopedLocation> {
    let mut decoded: Vec<(OffsetDateTime, &ScopedBookmark, BookmarkRecord)> = bookmarks
        .iter()
        .filter_map(|bookmark| match bookmark.decode() {
            Ok(record) => {
                let saved_at = OffsetDateTime::parse(&record.saved_at, &Rfc3339)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH);
                Some((saved_at, bookmark, record))
            }
            Err(err) => {
                tracing::warn!(id = %bookmark.id, error = %err, "corrupt bookmark skipped");
                None
            }
        })
        .collect();
    decoded.sort_by(|a, b| b.0.cmp(&a.0));

    let (_, bookmark, record) = decoded.into_iter().next()?;
    if !record.location.is_dir() {
        tracing::warn!(
            id = %bookmark.id,
            location = %record.location.display(),
            "bookmark is stale"
        );
        return None;
    }
    Some(ScopedLocation::new(bookmark.id.clone(), record.location))
}

fn generate_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn default_store_dir() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_local_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("logsync");
    path.push("bookmarks");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bookmark_survives_reopen() {
        let state = tempdir().unwrap();
        let folder = tempdir().unwrap();

        let store = FileBookmarkStore::open(state.path()).unwrap();
        let id = store.save(folder.path()).unwrap();
        store.close();

        let reopened = FileBookmarkStore::open(state.path()).unwrap();
        let location = reopened.load_active().unwrap().expect("bookmark should resolve");
        assert_eq!(location.bookmark_id(), id);
        assert_eq!(location.path(), fs::canonicalize(folder.path()).unwrap());
    }

    #[test]
    fn removed_folder_resolves_to_none() {
        let state = tempdir().unwrap();
        let folder = tempdir().unwrap();
        let store = FileBookmarkStore::open(state.path()).unwrap();
        store.save(folder.path()).unwrap();

        folder.close().unwrap();

        assert!(store.load_active().unwrap().is_none());
    }

    #[test]
    fn saving_same_folder_is_idempotent() {
        let state = tempdir().unwrap();
        let folder = tempdir().unwrap();
        let store = FileBookmarkStore::open(state.path()).unwrap();

        let first = store.save(folder.path()).unwrap();
        let second = store.save(folder.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn saving_new_folder_replaces_previous_bookmark() {
        let state = tempdir().unwrap();
        let old_folder = tempdir().unwrap();
        let new_folder = tempdir().unwrap();
        let store = FileBookmarkStore::open(state.path()).unwrap();

        store.save(old_folder.path()).unwrap();
        let id = store.save(new_folder.path()).unwrap();

        let stored = store.read_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        let active = store.load_active().unwrap().unwrap();
        assert_eq!(active.path(), fs::canonicalize(new_folder.path()).unwrap());
    }

    #[test]
    fn clear_all_removes_bookmarks() {
        let state = tempdir().unwrap();
        let folder = tempdir().unwrap();
        let store = FileBookmarkStore::open(state.path()).unwrap();
        store.save(folder.path()).unwrap();

        store.clear_all().unwrap();

        assert!(store.load_active().unwrap().is_none());
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn load_ignores_foreign_and_corrupt_files() {
        let state = tempdir().unwrap();
        let folder = tempdir().unwrap();
        let store = FileBookmarkStore::open(state.path()).unwrap();
        let id = store.save(folder.path()).unwrap();
        fs::write(state.path().join("notes.txt"), b"hello").unwrap();
        fs::write(state.path().join("broken.bookmark"), b"{not json").unwrap();

        let location = store.load_active().unwrap().unwrap();
        assert_eq!(location.bookmark_id(), id);
    }

    #[test]
    fn latest_bookmark_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let older = ScopedBookmark {
            id: "older".into(),
            encoded_location: serde_json::to_vec(&BookmarkRecord {
                location: first.path().to_path_buf(),
                saved_at: "2024-01-01T00:00:00Z".into(),
            })
            .unwrap(),
        };
        let newer = ScopedBookmark {
            id: "newer".into(),
            encoded_location: serde_json::to_vec(&BookmarkRecord {
                location: second.path().to_path_buf(),
                saved_at: "2024-06-01T00:00:00Z".into(),
            })
            .unwrap(),
        };

        let location = resolve_latest(&[older, newer]).unwrap();
        assert_eq!(location.bookmark_id(), "newer");
    }

    #[test]
    fn save_rejects_plain_files() {
        let state = tempdir().unwrap();
        let file = state.path().join("file.slopes");
        fs::write(&file, b"zip").unwrap();
        let store = MemoryBookmarkStore::default();

        assert!(matches!(
            store.save(&file),
            Err(StoreError::NotADirectory(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn memory_store_keeps_one_bookmark() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let store = MemoryBookmarkStore::default();

        let a = store.save(first.path()).unwrap();
        assert_eq!(store.save(first.path()).unwrap(), a);
        let b = store.save(second.path()).unwrap();

        assert_ne!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.load_active().unwrap().unwrap().bookmark_id(), b);
    }
}
