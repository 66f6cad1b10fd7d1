//! SQLite persistence for the name dataset
//!
//! Single `names(id, full_name, normalized_name)` table with an index on the matching
//! key. Uses an r2d2 pool so metric and stats reads never queue behind an import.

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::models::SourceRecord;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Pooled handle to the names database
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open or create a database at the given path, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA cache_size=-16000;
            ",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(4).build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // In-memory needs single connection to maintain state
        let pool = Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.setup_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> DatabaseResult<()> {
        let mut conn = self.get_conn()?;

        let columns = table_columns(&conn, "names")?;
        if !columns.is_empty() && !columns.iter().any(|c| c == "full_name") {
            Self::migrate_legacy_schema(&mut conn, &columns)?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS names (
                id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL,
                normalized_name TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_names_norm ON names(normalized_name);
        "#,
        )?;

        Ok(())
    }

    /// Rebuild a `names` table that predates the `full_name` column. Rows are carried over
    /// from `name` or `"Full Name"`; a table with neither is replaced by an empty one and
    /// refilled by the next import.
    fn migrate_legacy_schema(conn: &mut Connection, columns: &[String]) -> DatabaseResult<()> {
        let has = |name: &str| columns.iter().any(|c| c == name);
        let name_column = if has("name") {
            Some("name")
        } else if has("Full Name") {
            Some("\"Full Name\"")
        } else {
            None
        };
        let key_column = if has("normalized_name") {
            "COALESCE(normalized_name, '')"
        } else {
            "''"
        };

        tracing::info!(?columns, "migrating legacy names table");

        let tx = conn.transaction()?;
        tx.execute_batch(
            r#"
            DROP TABLE IF EXISTS names_new;
            CREATE TABLE names_new (
                id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL,
                normalized_name TEXT NOT NULL
            );
        "#,
        )?;
        if let Some(name_column) = name_column {
            tx.execute_batch(&format!(
                "INSERT INTO names_new(id, full_name, normalized_name)
                 SELECT id, COALESCE({name_column}, ''), {key_column} FROM names"
            ))?;
        }
        tx.execute_batch("DROP TABLE names; ALTER TABLE names_new RENAME TO names;")?;
        tx.commit()?;
        Ok(())
    }

    pub fn count_names(&self) -> DatabaseResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM names", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Replace the whole table in one transaction. Returns the number of rows written.
    pub fn replace_all(&self, records: &[SourceRecord]) -> DatabaseResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM names", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO names(id, full_name, normalized_name) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.raw_name,
                    record.normalized_name.as_deref().unwrap_or("")
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// All rows ordered by id. With `dedupe`, only the lowest id per non-empty
    /// `normalized_name` is returned.
    pub fn fetch_records(&self, dedupe: bool) -> DatabaseResult<Vec<SourceRecord>> {
        let conn = self.get_conn()?;
        let sql = if dedupe {
            "SELECT id, full_name, normalized_name FROM names
             WHERE normalized_name = ''
                OR id IN (SELECT MIN(id) FROM names WHERE normalized_name != '' GROUP BY normalized_name)
             ORDER BY id"
        } else {
            "SELECT id, full_name, normalized_name FROM names ORDER BY id"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(2)?;
                Ok(SourceRecord {
                    id: row.get(0)?,
                    raw_name: row.get(1)?,
                    normalized_name: Some(key).filter(|k| !k.is_empty()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn table_columns(conn: &Connection, table: &str) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SourceRecord> {
        vec![
            SourceRecord::new(1, "Ana Ruiz").with_normalized("ana ruiz"),
            SourceRecord::new(2, "ANA RUIZ").with_normalized("ana ruiz"),
            SourceRecord::new(3, "Eva Gómez").with_normalized("eva gomez"),
            SourceRecord::new(4, "!!!"),
            SourceRecord::new(5, "???"),
        ]
    }

    #[test]
    fn test_schema_created_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.count_names().unwrap(), 0);
        assert!(db.fetch_records(false).unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.replace_all(&sample()).unwrap(), 5);
        assert_eq!(db.count_names().unwrap(), 5);

        let records = db.fetch_records(false).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[2], SourceRecord::new(3, "Eva Gómez").with_normalized("eva gomez"));
        // Empty key comes back as None
        assert_eq!(records[3].normalized_name, None);

        // Second import replaces rather than appends
        db.replace_all(&sample()[..2]).unwrap();
        assert_eq!(db.count_names().unwrap(), 2);
    }

    #[test]
    fn test_fetch_dedupe_keeps_lowest_id() {
        let db = Database::open_in_memory().unwrap();
        db.replace_all(&sample()).unwrap();
        let ids: Vec<i64> = db.fetch_records(true).unwrap().iter().map(|r| r.id).collect();
        // Rows without a key are never merged
        assert_eq!(ids, vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_migrates_legacy_name_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE names (id INTEGER PRIMARY KEY, name TEXT, normalized_name TEXT);
                 INSERT INTO names VALUES (1, 'Ana Ruiz', 'ana ruiz');
                 INSERT INTO names VALUES (2, 'Eva', NULL);",
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let records = db.fetch_records(false).unwrap();
        assert_eq!(
            records,
            vec![
                SourceRecord::new(1, "Ana Ruiz").with_normalized("ana ruiz"),
                SourceRecord::new(2, "Eva"),
            ]
        );
    }

    #[test]
    fn test_migrates_unknown_legacy_table_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("odd.db");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE names (id INTEGER PRIMARY KEY, label TEXT);
                 INSERT INTO names VALUES (1, 'x');",
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.count_names().unwrap(), 0);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("names.db");
        let db = Database::open(&path).unwrap();
        db.replace_all(&sample()).unwrap();
        assert!(path.exists());
        assert_eq!(db.count_names().unwrap(), 5);
    }
}
