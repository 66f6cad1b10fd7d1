//! Record stores: where the dataset comes from.
//!
//! A store hands the matcher a full snapshot of `SourceRecord`s ordered by id together
//! with a description of where they came from. Stores are only consulted at startup and
//! on reload; the index never talks to them per query.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{DatasetMode, ServiceConfig, StorageKind};
use crate::database::{Database, DatabaseError};
use crate::models::SourceRecord;
use crate::normalize::Normalizer;

/// Accepted id headers, in preference order.
pub const ID_HEADERS: &[&str] = &["id", "ID", "Id"];
/// Accepted name headers, in preference order.
pub const NAME_HEADERS: &[&str] = &["name", "Full Name", "full_name", "FullName", "nombre", "Name"];
/// Precomputed matching key in standardized datasets.
pub const STRICT_KEY_HEADER: &str = "strict_key";

#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("reading {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{}: no {column} column (headers: {found:?})", path.display())]
    MissingColumn {
        path: PathBuf,
        column: &'static str,
        found: Vec<String>,
    },
    #[error("{} line {line}: invalid id {value:?}", path.display())]
    InvalidId {
        path: PathBuf,
        line: u64,
        value: String,
    },
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type StoreResult<T> = Result<T, RecordStoreError>;

/// Where the active dataset came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub storage: &'static str,
    pub dataset_mode: DatasetMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
    /// Rows imported into SQLite by this load. `None` when an existing table was reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_loaded_rows: Option<usize>,
    pub records: usize,
    pub loaded_at: DateTime<Utc>,
}

/// Full snapshot returned by a store.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub records: Vec<SourceRecord>,
    pub info: DatasetInfo,
}

/// Source of the full record set
pub trait RecordStore: Send + Sync {
    fn load(&self) -> StoreResult<LoadedDataset>;
}

// ─────────────────────────────────────────────────────────────────────────────
// IN-MEMORY
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed record list, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Vec<SourceRecord>,
}

impl InMemoryStore {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }

    /// Records with ids assigned from 1 in iteration order.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = names
            .into_iter()
            .zip(1..)
            .map(|(name, id)| SourceRecord::new(id, name))
            .collect();
        Self { records }
    }
}

impl RecordStore for InMemoryStore {
    fn load(&self) -> StoreResult<LoadedDataset> {
        let mut records = self.records.clone();
        records.sort_by_key(|r| r.id);
        Ok(LoadedDataset {
            info: DatasetInfo {
                storage: "memory",
                dataset_mode: DatasetMode::Original,
                dataset_path: None,
                sqlite_path: None,
                sqlite_loaded_rows: None,
                records: records.len(),
                loaded_at: Utc::now(),
            },
            records,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSV
// ─────────────────────────────────────────────────────────────────────────────

/// Read a names CSV. In standardized modes a non-blank `strict_key` cell becomes the
/// record's store-provided key. Output is ordered by id.
pub fn read_csv_records(path: &Path, mode: DatasetMode) -> StoreResult<Vec<SourceRecord>> {
    let csv_err = |source: csv::Error| RecordStoreError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();

    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|wanted| headers.iter().position(|h| h == *wanted))
    };
    let missing = |column: &'static str| RecordStoreError::MissingColumn {
        path: path.to_path_buf(),
        column,
        found: headers.iter().map(str::to_string).collect(),
    };
    let id_col = find(ID_HEADERS).ok_or_else(|| missing("id"))?;
    let name_col = find(NAME_HEADERS).ok_or_else(|| missing("name"))?;
    let key_col = if mode.is_standardized() {
        find(&[STRICT_KEY_HEADER])
    } else {
        None
    };

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_err)?;
        let raw_id = row.get(id_col).unwrap_or("").trim();
        let id = raw_id.parse::<i64>().map_err(|_| RecordStoreError::InvalidId {
            path: path.to_path_buf(),
            line: row.position().map_or(0, |p| p.line()),
            value: raw_id.to_string(),
        })?;
        let mut record = SourceRecord::new(id, row.get(name_col).unwrap_or(""));
        if let Some(key) = key_col.and_then(|col| row.get(col)).filter(|k| !k.trim().is_empty()) {
            record = record.with_normalized(key);
        }
        records.push(record);
    }

    records.sort_by_key(|r| r.id);
    Ok(records)
}

/// Keep the lowest id per non-empty normalized name. Records that normalize to nothing
/// are kept as they are.
pub fn dedupe_by_normalized(records: Vec<SourceRecord>, normalizer: &Normalizer) -> Vec<SourceRecord> {
    let mut sorted = records;
    sorted.sort_by_key(|r| r.id);

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|record| {
            let key = normalizer.normalize(record.matching_text()).text;
            key.is_empty() || seen.insert(key)
        })
        .collect()
}

/// Dataset held in a CSV file and read in full on every load.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
    mode: DatasetMode,
    normalizer: Normalizer,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>, mode: DatasetMode, normalizer: Normalizer) -> Self {
        Self {
            path: path.into(),
            mode,
            normalizer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for CsvStore {
    fn load(&self) -> StoreResult<LoadedDataset> {
        let mut records = read_csv_records(&self.path, self.mode)?;
        if self.mode.dedupe() {
            records = dedupe_by_normalized(records, &self.normalizer);
        }
        tracing::info!(path = %self.path.display(), records = records.len(), mode = self.mode.as_str(), "loaded CSV dataset");
        Ok(LoadedDataset {
            info: DatasetInfo {
                storage: StorageKind::Csv.as_str(),
                dataset_mode: self.mode,
                dataset_path: Some(self.path.clone()),
                sqlite_path: None,
                sqlite_loaded_rows: None,
                records: records.len(),
                loaded_at: Utc::now(),
            },
            records,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLITE
// ─────────────────────────────────────────────────────────────────────────────

/// Dataset persisted in SQLite and seeded from CSV.
///
/// The CSV is imported when the table is empty or when `force_reload` is set. Imported
/// rows carry their normalized matching key (from `strict_key` in standardized modes,
/// from the name otherwise), so SQL dedupe groups the same keys as `CsvStore`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    csv_path: PathBuf,
    mode: DatasetMode,
    force_reload: bool,
    normalizer: Normalizer,
}

impl SqliteStore {
    pub fn new(
        db_path: impl Into<PathBuf>,
        csv_path: impl Into<PathBuf>,
        mode: DatasetMode,
        force_reload: bool,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            csv_path: csv_path.into(),
            mode,
            force_reload,
            normalizer,
        }
    }

    fn import(&self, db: &Database) -> StoreResult<usize> {
        let records: Vec<SourceRecord> = read_csv_records(&self.csv_path, self.mode)?
            .into_iter()
            .map(|record| {
                let key = self.normalizer.normalize(record.matching_text()).text;
                record.with_normalized(key)
            })
            .collect();
        let written = db.replace_all(&records)?;
        tracing::info!(
            csv = %self.csv_path.display(),
            sqlite = %self.db_path.display(),
            rows = written,
            "imported dataset into SQLite"
        );
        Ok(written)
    }
}

impl RecordStore for SqliteStore {
    fn load(&self) -> StoreResult<LoadedDataset> {
        let db = Database::open(&self.db_path)?;

        let loaded_rows = if self.force_reload || db.count_names()? == 0 {
            Some(self.import(&db)?)
        } else {
            None
        };

        let records = db.fetch_records(self.mode.dedupe())?;
        Ok(LoadedDataset {
            info: DatasetInfo {
                storage: StorageKind::Sqlite.as_str(),
                dataset_mode: self.mode,
                dataset_path: Some(self.csv_path.clone()),
                sqlite_path: Some(self.db_path.clone()),
                sqlite_loaded_rows: loaded_rows,
                records: records.len(),
                loaded_at: Utc::now(),
            },
            records,
        })
    }
}

/// Store selected by the service configuration.
pub fn build_store(config: &ServiceConfig) -> Box<dyn RecordStore> {
    let normalizer = Normalizer::new(&config.engine.honorifics);
    let dataset_path = config.dataset_path();
    match config.storage {
        StorageKind::Csv => Box::new(CsvStore::new(dataset_path, config.dataset_mode, normalizer)),
        StorageKind::Sqlite => Box::new(SqliteStore::new(
            &config.sqlite_path,
            dataset_path,
            config.dataset_mode,
            config.sqlite_force_reload,
            normalizer,
        )),
    }
}
