mod bookmark_store;
mod scoped_access;

pub use bookmark_store::{
    BookmarkStore, FileBookmarkStore, MemoryBookmarkStore, ScopedBookmark, StoreError,
};
pub use scoped_access::{AccessError, AccessGuard, ScopedLocation};
