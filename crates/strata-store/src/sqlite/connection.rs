//! `SQLite` connection pools.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` backend. The
//! [`PragmaCustomizer`] runs on each new connection to enable WAL mode and
//! performance pragmas, and to attach the schema database when one is
//! configured.
//!
//! Pools are opened from a [`ConnectionTarget`]: an explicit DSN, a file
//! path, or the name of a pool registered with [`register_instance`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::errors::{Result, StorageError};

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const MEMORY_DSN: &str = ":memory:";

/// A database attached to every pooled connection under `name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedDatabase {
    /// Schema name used to qualify tables.
    pub name: String,
    /// File path, or `:memory:`.
    pub path: String,
}

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size (default: 16).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 30000).
    pub busy_timeout_ms: u32,
    /// Cache size in KiB (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
    /// Schema database to attach.
    pub attach: Option<AttachedDatabase>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
            attach: None,
        }
    }
}

/// `SQLite` pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    cache_size_kib: i64,
    attach: Option<AttachedDatabase>,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA cache_size = -{};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms, self.cache_size_kib
        ))?;
        if let Some(db) = &self.attach {
            let _ = conn.execute(&format!("ATTACH DATABASE ?1 AS \"{}\"", db.name), [&db.path])?;
            conn.execute_batch(&format!("PRAGMA \"{}\".journal_mode = WAL;", db.name))?;
        }
        Ok(())
    }
}

fn build_pool(manager: SqliteConnectionManager, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
            cache_size_kib: config.cache_size_kib,
            attach: config.attach.clone(),
        }))
        .build(manager)?;
    Ok(pool)
}

/// Create an in-memory connection pool (for testing).
///
/// Every pooled connection opens its own private database, so the pool is
/// capped at a single connection.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    let config = ConnectionConfig {
        pool_size: 1,
        ..config.clone()
    };
    build_pool(SqliteConnectionManager::memory(), &config)
}

/// Create a file-backed connection pool.
pub fn new_file(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<ConnectionPool> {
    build_pool(SqliteConnectionManager::file(path), config)
}

/// Create a pool from a DSN: `:memory:`, a `file:` URI, or a plain path.
pub fn new_from_dsn(dsn: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    if dsn == MEMORY_DSN {
        return new_in_memory(config);
    }
    if dsn.starts_with("file:") {
        let manager = SqliteConnectionManager::file(dsn).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        return build_pool(manager, config);
    }
    new_file(dsn, config)
}

/// Where a service's pool comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// `:memory:`, a `file:` URI, or a plain path.
    Dsn(String),
    /// Database file path.
    Path(PathBuf),
    /// Name of a pool registered with [`register_instance`].
    Instance(String),
}

impl ConnectionTarget {
    /// Pick the target by priority: DSN, then path, then registered instance.
    pub fn resolve(
        dsn: Option<&str>,
        path: Option<&str>,
        instance_name: Option<&str>,
    ) -> Result<Self> {
        let non_empty = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(dsn) = non_empty(dsn) {
            return Ok(Self::Dsn(dsn));
        }
        if let Some(path) = non_empty(path) {
            return Ok(Self::Path(PathBuf::from(path)));
        }
        if let Some(name) = non_empty(instance_name) {
            return Ok(Self::Instance(name));
        }
        Err(StorageError::Connection(
            "one of dsn, path, or instance name is required".into(),
        ))
    }

    /// Open (or look up) the pool for this target.
    pub fn open(&self, config: &ConnectionConfig) -> Result<ConnectionPool> {
        match self {
            Self::Dsn(dsn) => new_from_dsn(dsn, config),
            Self::Path(path) => new_file(path, config),
            Self::Instance(name) => instance(name).ok_or_else(|| {
                StorageError::Connection(format!("sqlite instance {name:?} is not registered"))
            }),
        }
    }

    /// Backing file of the main database, when there is one.
    pub fn file_path(&self) -> Option<PathBuf> {
        match self {
            Self::Path(path) => Some(path.clone()),
            Self::Dsn(dsn) if dsn != MEMORY_DSN && !dsn.starts_with("file:") => {
                Some(PathBuf::from(dsn))
            }
            _ => None,
        }
    }
}

/// Path of the file holding `schema` next to the main database
/// (`sessions.db` + `audit` → `sessions.audit.db`). In-memory main
/// databases get an in-memory schema database.
pub fn schema_database_path(main: Option<&Path>, schema: &str) -> String {
    let Some(main) = main else {
        return MEMORY_DSN.to_string();
    };
    let stem = main
        .file_stem()
        .map_or_else(|| "strata".to_string(), |s| s.to_string_lossy().into_owned());
    main.with_file_name(format!("{stem}.{schema}.db"))
        .to_string_lossy()
        .into_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance registry
// ─────────────────────────────────────────────────────────────────────────────

static INSTANCES: LazyLock<RwLock<HashMap<String, ConnectionPool>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register a pool under `name`, replacing any previous registration.
pub fn register_instance(name: impl Into<String>, pool: ConnectionPool) {
    let name = name.into();
    info!(instance = %name, "registered sqlite instance");
    let _ = INSTANCES.write().insert(name, pool);
}

/// Look up a registered pool.
pub fn instance(name: &str) -> Option<ConnectionPool> {
    INSTANCES.read().get(name).cloned()
}

/// Remove a registration. Returns whether one existed.
pub fn unregister_instance(name: &str) -> bool {
    let removed = INSTANCES.write().remove(name).is_some();
    if removed {
        debug!(instance = %name, "unregistered sqlite instance");
    }
    removed
}

/// Verify pragmas are set correctly on a connection.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        busy_timeout_ms,
    })
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (should be "wal").
    pub journal_mode: String,
    /// Busy timeout applied by the customizer.
    pub busy_timeout_ms: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn in_memory_pool_is_single_connection() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        assert_eq!(pool.max_size(), 1);
        let conn = pool.get().unwrap();
        let pragmas = verify_pragmas(&conn).unwrap();
        assert!(
            pragmas.journal_mode == "wal" || pragmas.journal_mode == "memory",
            "journal_mode should be wal or memory, got: {}",
            pragmas.journal_mode
        );
        assert_eq!(pragmas.busy_timeout_ms, 30_000);
    }

    #[test]
    fn file_pool_creates_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = new_file(&path, &ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        assert_eq!(verify_pragmas(&conn).unwrap().journal_mode, "wal");
    }

    #[test]
    fn file_uri_dsn() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("file:{}", dir.path().join("uri.db").display());
        let pool = new_from_dsn(&dsn, &ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
    }

    #[test]
    fn attached_schema_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("sessions.db");
        let config = ConnectionConfig {
            attach: Some(AttachedDatabase {
                name: "audit".into(),
                path: schema_database_path(Some(&main), "audit"),
            }),
            ..ConnectionConfig::default()
        };
        let pool = new_file(&main, &config).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch("CREATE TABLE audit.t (x INTEGER)").unwrap();
        assert!(dir.path().join("sessions.audit.db").exists());
    }

    #[test]
    fn schema_path_for_memory() {
        assert_eq!(schema_database_path(None, "audit"), ":memory:");
    }

    #[test]
    fn resolve_priority() {
        assert_eq!(
            ConnectionTarget::resolve(Some("a.db"), Some("b.db"), Some("c")).unwrap(),
            ConnectionTarget::Dsn("a.db".into())
        );
        assert_eq!(
            ConnectionTarget::resolve(Some(""), Some("b.db"), Some("c")).unwrap(),
            ConnectionTarget::Path("b.db".into())
        );
        assert_eq!(
            ConnectionTarget::resolve(None, None, Some("c")).unwrap(),
            ConnectionTarget::Instance("c".into())
        );
        assert_matches!(
            ConnectionTarget::resolve(None, None, None),
            Err(StorageError::Connection(_))
        );
    }

    #[test]
    fn registered_instance_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_file(dir.path().join("shared.db"), &ConnectionConfig::default()).unwrap();
        register_instance("registry-test", pool.clone());

        let target = ConnectionTarget::Instance("registry-test".into());
        let opened = target.open(&ConnectionConfig::default()).unwrap();
        assert_eq!(opened.max_size(), pool.max_size());

        assert!(unregister_instance("registry-test"));
        assert!(!unregister_instance("registry-test"));
        assert_matches!(
            target.open(&ConnectionConfig::default()),
            Err(StorageError::Connection(_))
        );
    }

    #[test]
    fn default_config_values() {
        let config = ConnectionConfig::default();
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.busy_timeout_ms, 30_000);
        assert_eq!(config.cache_size_kib, 8192);
        assert!(config.attach.is_none());
    }
}
