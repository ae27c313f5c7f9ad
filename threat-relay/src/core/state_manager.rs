/*!
Persistent state: the set of threat ids already delivered downstream
*/

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::core::config::{StateBackend, StateConfig};

/// Size at which the JSON state file is moved aside before the next write
pub const ROTATE_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("state file {path:?} is not a JSON array of ids: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not encode processed ids: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("state database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{path:?} is locked by another relay process")]
    Locked { path: PathBuf },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable set of processed threat ids.
///
/// `save` always receives the complete set, so a backend can rewrite from
/// scratch or upsert; either way the set must be durable when it returns.
pub trait IdStore: Send {
    /// Name of the backend, for logs
    fn name(&self) -> &'static str;

    /// Read the persisted ids. A store that has never been written is empty.
    fn load(&mut self) -> Result<HashSet<String>, StoreError>;

    /// Persist `ids`
    fn save(&mut self, ids: &HashSet<String>) -> Result<(), StoreError>;
}

/// Open the backend selected in `config`
pub fn open_store(config: &StateConfig) -> Result<Box<dyn IdStore>, StoreError> {
    let store: Box<dyn IdStore> = match config.backend {
        StateBackend::Json => Box::new(JsonIdStore::open(&config.path)?),
        StateBackend::Sqlite => Box::new(SqliteIdStore::open(&config.path)?),
    };
    info!("Processed ids stored in {:?} ({})", config.path, store.name());
    Ok(store)
}

/// Ids kept as a JSON array in a single file.
///
/// The file is rewritten in full on every save. Once it reaches
/// [`ROTATE_THRESHOLD_BYTES`] its contents are kept as
/// `<path>.<YYYYMMDDHHMMSS>.bak` and the live file starts over.
pub struct JsonIdStore {
    path: PathBuf,
    rotate_threshold: u64,
    // Held for the lifetime of the store; dropping it releases the lock.
    _lock: File,
}

impl JsonIdStore {
    /// Open the store at `path`, taking an exclusive lock on `<path>.lock`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let lock_path = sibling(&path, ".lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path: lock_path });
        }

        Ok(Self {
            path,
            rotate_threshold: ROTATE_THRESHOLD_BYTES,
            _lock: lock,
        })
    }

    pub fn with_rotate_threshold(mut self, bytes: u64) -> Self {
        self.rotate_threshold = bytes;
        self
    }

    /// Keep a timestamped copy of the current file if it has grown past the
    /// threshold. The primary stays in place until the caller renames the
    /// new contents over it. Returns the backup path when a rotation happened.
    fn rotate_if_needed(&self) -> Result<Option<PathBuf>, StoreError> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        if size < self.rotate_threshold {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let backup = sibling(&self.path, &format!(".{stamp}.bak"));
        if fs::hard_link(&self.path, &backup).is_err() {
            // Filesystems without hard links get a full copy instead.
            fs::copy(&self.path, &backup).map_err(io_error(&backup))?;
        }

        info!("Rotated state file ({} bytes) to {:?}", size, backup);
        Ok(Some(backup))
    }
}

impl IdStore for JsonIdStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load(&mut self) -> Result<HashSet<String>, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(io_error(&self.path)(e)),
        };

        let ids: Vec<String> =
            serde_json::from_slice(&content).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(ids.into_iter().collect())
    }

    fn save(&mut self, ids: &HashSet<String>) -> Result<(), StoreError> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        let json = serde_json::to_vec(&sorted)?;

        // The primary file must hold the last committed set until the new
        // one is fully on disk: write aside, back up, then rename over.
        let tmp = sibling(&self.path, ".tmp");
        {
            let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
            file.write_all(&json).map_err(io_error(&tmp))?;
            file.sync_all().map_err(io_error(&tmp))?;
        }
        self.rotate_if_needed()?;
        fs::rename(&tmp, &self.path).map_err(io_error(&self.path))?;

        debug!("Saved {} processed ids to {:?}", ids.len(), self.path);
        Ok(())
    }
}

/// `<path><suffix>`, e.g. `state.json` + `.lock` = `state.json.lock`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Ids kept in a SQLite table
pub struct SqliteIdStore {
    conn: Connection,
}

impl SqliteIdStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processed_threats (
                threat_id TEXT PRIMARY KEY,
                processed_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;
        Ok(Self { conn })
    }
}

impl IdStore for SqliteIdStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load(&mut self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT threat_id FROM processed_threats")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    fn save(&mut self, ids: &HashSet<String>) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO processed_threats (threat_id) VALUES (?1)")?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;

        debug!("Saved {} processed ids to sqlite", ids.len());
        Ok(())
    }
}
