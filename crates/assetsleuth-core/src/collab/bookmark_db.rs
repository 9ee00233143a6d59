/// The bookmark database: JSON values stored per `(path, key)` in one of two
/// tables.
///
/// All access goes through a [`BookmarkTxn`]. Reads and writes inside one
/// transaction apply as a batch; dropping a transaction without calling
/// [`BookmarkTxn::commit`] rolls it back.
use crate::error::DbError;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Which table a value lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// Per-item data (description, flags).
    Data,
    /// Per-bookmark properties (e.g. the asset identifier).
    Bookmark,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Bookmark => "bookmark",
        }
    }
}

pub trait BookmarkTxn {
    fn get(&mut self, path: &str, key: &str, table: Table) -> Result<Option<Value>, DbError>;
    fn set(&mut self, path: &str, key: &str, value: Value, table: Table) -> Result<(), DbError>;
    fn commit(self: Box<Self>) -> Result<(), DbError>;
}

pub trait BookmarkDb: Send + Sync {
    /// Open a transaction. Only one is open at a time; callers block until
    /// the previous one ends.
    fn transaction(&self) -> Result<Box<dyn BookmarkTxn + '_>, DbError>;
}

// ── In-memory ─────────────────────────────────────────────────────────────

type Cell = (Table, String, String);

/// Volatile database, used by tests and when no database file is configured.
#[derive(Default)]
pub struct MemoryBookmarkDb {
    values: Mutex<HashMap<Cell, Value>>,
}

impl MemoryBookmarkDb {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTxn<'a> {
    values: MutexGuard<'a, HashMap<Cell, Value>>,
    pending: HashMap<Cell, Value>,
}

impl BookmarkTxn for MemoryTxn<'_> {
    fn get(&mut self, path: &str, key: &str, table: Table) -> Result<Option<Value>, DbError> {
        let cell = (table, path.to_owned(), key.to_owned());
        Ok(self
            .pending
            .get(&cell)
            .or_else(|| self.values.get(&cell))
            .cloned())
    }

    fn set(&mut self, path: &str, key: &str, value: Value, table: Table) -> Result<(), DbError> {
        self.pending
            .insert((table, path.to_owned(), key.to_owned()), value);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        let pending = std::mem::take(&mut self.pending);
        self.values.extend(pending);
        Ok(())
    }
}

impl BookmarkDb for MemoryBookmarkDb {
    fn transaction(&self) -> Result<Box<dyn BookmarkTxn + '_>, DbError> {
        Ok(Box::new(MemoryTxn {
            values: self.values.lock(),
            pending: HashMap::new(),
        }))
    }
}

// ── SQLite ────────────────────────────────────────────────────────────────

/// Database file backed by SQLite.
pub struct SqliteBookmarkDb {
    conn: Mutex<Connection>,
}

impl SqliteBookmarkDb {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        debug!("Opening bookmark database {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        for table in [Table::Data, Table::Bookmark] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (id, key)
                )",
                table.name()
            ))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl BookmarkTxn for SqliteTxn<'_> {
    fn get(&mut self, path: &str, key: &str, table: Table) -> Result<Option<Value>, DbError> {
        let sql = format!("SELECT value FROM {} WHERE id = ?1 AND key = ?2", table.name());
        let raw: Option<String> = self
            .conn
            .query_row(&sql, params![path, key], |row| row.get(0))
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    fn set(&mut self, path: &str, key: &str, value: Value, table: Table) -> Result<(), DbError> {
        let sql = format!(
            "INSERT INTO {} (id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(id, key) DO UPDATE SET value = excluded.value",
            table.name()
        );
        self.conn
            .execute(&sql, params![path, key, serde_json::to_string(&value)?])?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Bookmark transaction rollback failed: {e}");
            }
        }
    }
}

impl BookmarkDb for SqliteBookmarkDb {
    fn transaction(&self) -> Result<Box<dyn BookmarkTxn + '_>, DbError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTxn {
            conn,
            finished: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip_commit(db: &dyn BookmarkDb) {
        let mut txn = db.transaction().unwrap();
        txn.set("/a/x.ma", "description", json!("hero"), Table::Data)
            .unwrap();
        assert_eq!(
            txn.get("/a/x.ma", "description", Table::Data).unwrap(),
            Some(json!("hero"))
        );
        txn.commit().unwrap();

        let mut txn = db.transaction().unwrap();
        assert_eq!(
            txn.get("/a/x.ma", "description", Table::Data).unwrap(),
            Some(json!("hero"))
        );
        assert_eq!(txn.get("/a/x.ma", "description", Table::Bookmark).unwrap(), None);
    }

    fn dropped_txn_rolls_back(db: &dyn BookmarkDb) {
        {
            let mut txn = db.transaction().unwrap();
            txn.set("/a/y.ma", "flags", json!(2), Table::Data).unwrap();
        }
        let mut txn = db.transaction().unwrap();
        assert_eq!(txn.get("/a/y.ma", "flags", Table::Data).unwrap(), None);
    }

    #[test]
    fn memory_db_commits_and_rolls_back() {
        let db = MemoryBookmarkDb::new();
        roundtrip_commit(&db);
        dropped_txn_rolls_back(&db);
    }

    #[test]
    fn sqlite_db_commits_and_rolls_back() {
        let db = SqliteBookmarkDb::open_in_memory().unwrap();
        roundtrip_commit(&db);
        dropped_txn_rolls_back(&db);
    }

    #[test]
    fn sqlite_db_persists_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/bookmarks.db");
        {
            let db = SqliteBookmarkDb::open(&path).unwrap();
            let mut txn = db.transaction().unwrap();
            txn.set("/a", "identifier", json!("workspace.mel"), Table::Bookmark)
                .unwrap();
            txn.commit().unwrap();
        }
        let db = SqliteBookmarkDb::open(&path).unwrap();
        let mut txn = db.transaction().unwrap();
        assert_eq!(
            txn.get("/a", "identifier", Table::Bookmark).unwrap(),
            Some(json!("workspace.mel"))
        );
    }
}
