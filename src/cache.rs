use crate::error::{GwhoError, Result};
use crate::model::{HistorySnapshot, SCHEMA_VERSION};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DB_FILE: &str = "cache.db";

/// Identifies the repository and mailmap state a snapshot was computed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub repo_fingerprint: String,
    pub mailmap_fingerprint: String,
}

/// Persistent store for one repository's resolved commit history.
///
/// Holds a single snapshot row. A row whose key differs from the current one
/// is a miss and is replaced by the next [`Cache::put`]. Anything unreadable
/// (a truncated payload, a file that is not a database, an old schema) is
/// also a miss, never an error.
pub struct Cache {
    conn: Option<Connection>,
}

impl Cache {
    /// Opens (or creates) `dir/cache.db`, rebuilding it if it is unusable.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);

        let conn = match Self::connect(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "discarding unusable cache");
                remove_db_files(&db_path)?;
                Self::connect(&db_path)?
            }
        };

        debug!(path = %db_path.display(), "cache open");
        Ok(Self { conn: Some(conn) })
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        initialize(&conn)?;
        Ok(conn)
    }

    pub fn get(&self, key: &CacheKey) -> Option<HistorySnapshot> {
        let conn = self.conn.as_ref()?;
        match read_snapshot(conn, key) {
            Ok(Some(snapshot)) => {
                info!(commits = snapshot.commits.len(), "cache hit");
                Some(snapshot)
            }
            Ok(None) => {
                info!("cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "cache unreadable, treating as miss");
                None
            }
        }
    }

    /// Replaces whatever is stored with `snapshot` under `key`.
    pub fn put(&mut self, key: &CacheKey, snapshot: &HistorySnapshot) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };

        let payload = serde_json::to_vec(snapshot)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snapshot", [])?;
        tx.execute(
            "INSERT INTO snapshot (id, repo_fingerprint, mailmap_fingerprint, created_at, payload)
             VALUES (1, ?, ?, ?, ?)",
            params![
                key.repo_fingerprint,
                key.mailmap_fingerprint,
                Utc::now().timestamp(),
                payload
            ],
        )?;
        tx.commit()?;

        debug!(
            commits = snapshot.commits.len(),
            bytes = payload.len(),
            "cache write"
        );
        Ok(())
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    let user_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    if user_version != 0 && user_version != SCHEMA_VERSION as i64 {
        info!(
            found = user_version,
            expected = SCHEMA_VERSION,
            "cache schema changed, dropping old data"
        );
        conn.execute_batch("DROP TABLE IF EXISTS snapshot;")?;
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            repo_fingerprint TEXT NOT NULL,
            mailmap_fingerprint TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            payload BLOB NOT NULL
        );
        ",
    )?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    Ok(())
}

fn read_snapshot(conn: &Connection, key: &CacheKey) -> Result<Option<HistorySnapshot>> {
    let row: Option<(String, String, Vec<u8>)> = conn
        .query_row(
            "SELECT repo_fingerprint, mailmap_fingerprint, payload FROM snapshot WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((repo_fingerprint, mailmap_fingerprint, payload)) = row else {
        return Ok(None);
    };

    if repo_fingerprint != key.repo_fingerprint || mailmap_fingerprint != key.mailmap_fingerprint {
        debug!(
            stored_repo = %repo_fingerprint,
            stored_mailmap = %mailmap_fingerprint,
            "cache entry is stale"
        );
        return Ok(None);
    }

    let snapshot: HistorySnapshot = serde_json::from_slice(&payload)?;
    if snapshot.version != SCHEMA_VERSION {
        return Err(GwhoError::Cache(format!(
            "Payload version mismatch: expected {}, found {}",
            SCHEMA_VERSION, snapshot.version
        )));
    }
    Ok(Some(snapshot))
}

fn remove_db_files(db_path: &Path) -> Result<()> {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        match std::fs::remove_file(PathBuf::from(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Per-repository cache directory: `<base>/gwho/<repo-name>-<path-hash>`.
pub fn default_cache_dir(repo_root: &Path) -> Option<PathBuf> {
    let base = dirs::cache_dir().or_else(|| dirs::home_dir().map(|h| h.join(".cache")))?;
    Some(base.join("gwho").join(repo_dir_name(repo_root)))
}

fn repo_dir_name(repo_root: &Path) -> String {
    use sha2::{Digest, Sha256};

    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hash: String = format!("{digest:x}").chars().take(12).collect();

    let name: String = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(20)
        .collect();

    format!("{name}-{hash}")
}
