/// Contracts for the services the engine consumes but does not own, plus
/// their default implementations.
///
/// - [`ThumbnailCache`]: produce a thumbnail for a path and its average colour.
/// - [`BookmarkDb`]: per-path key/value storage with scoped transactions.
pub mod bookmark_db;
pub mod thumbnail;

pub use bookmark_db::{BookmarkDb, BookmarkTxn, MemoryBookmarkDb, SqliteBookmarkDb, Table};
pub use thumbnail::{ImageThumbnailCache, ThumbnailCache};

/// Key holding a record's free-text description.
pub const DESCRIPTION_KEY: &str = "description";
/// Key holding a record's persisted flag bits.
pub const FLAGS_KEY: &str = "flags";
