//! Table naming, DDL, and schema verification.
//!
//! Six tables back the session store. Each is described once by a
//! [`TableSpec`]; the same descriptor drives `CREATE TABLE` / `CREATE INDEX`
//! generation and the verifier, so the two cannot drift.
//!
//! Table names are `[schema.]<prefix><base>` and index names
//! `idx_[schema_]<prefix><base>_<suffix>`. Creation is idempotent and runs
//! in one transaction; verification treats missing tables, missing columns,
//! and type or nullability mismatches as fatal and missing indexes as
//! warnings.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::{Result, StorageError};

/// Base name of the session state table.
pub const SESSION_STATES: &str = "session_states";
/// Base name of the event table.
pub const SESSION_EVENTS: &str = "session_events";
/// Base name of the track event table.
pub const SESSION_TRACK_EVENTS: &str = "session_track_events";
/// Base name of the summary table.
pub const SESSION_SUMMARIES: &str = "session_summaries";
/// Base name of the app state table.
pub const APP_STATES: &str = "app_states";
/// Base name of the user state table.
pub const USER_STATES: &str = "user_states";

const MAIN_SCHEMA: &str = "main";

// ─────────────────────────────────────────────────────────────────────────────
// Names
// ─────────────────────────────────────────────────────────────────────────────

/// Fully-qualified table names for one service instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableNames {
    schema: String,
    prefix: String,
    /// `session_states`.
    pub session_states: String,
    /// `session_events`.
    pub session_events: String,
    /// `session_track_events`.
    pub session_track_events: String,
    /// `session_summaries`.
    pub session_summaries: String,
    /// `app_states`.
    pub app_states: String,
    /// `user_states`.
    pub user_states: String,
}

impl TableNames {
    /// Names for `schema` (empty = main database) and an already
    /// normalized `prefix` (empty or ending in `_`).
    pub fn new(schema: &str, prefix: &str) -> Self {
        let schema = if schema == MAIN_SCHEMA { "" } else { schema };
        let qualify = |base: &str| {
            if schema.is_empty() {
                format!("{prefix}{base}")
            } else {
                format!("{schema}.{prefix}{base}")
            }
        };
        Self {
            schema: schema.to_string(),
            prefix: prefix.to_string(),
            session_states: qualify(SESSION_STATES),
            session_events: qualify(SESSION_EVENTS),
            session_track_events: qualify(SESSION_TRACK_EVENTS),
            session_summaries: qualify(SESSION_SUMMARIES),
            app_states: qualify(APP_STATES),
            user_states: qualify(USER_STATES),
        }
    }

    /// Schema name, empty for the main database.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table prefix including its trailing underscore.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unqualified table name (`<prefix><base>`).
    pub fn bare(&self, base: &str) -> String {
        format!("{}{base}", self.prefix)
    }

    /// Qualified table name for `base`.
    pub fn qualified(&self, base: &str) -> String {
        if self.schema.is_empty() {
            self.bare(base)
        } else {
            format!("{}.{}", self.schema, self.bare(base))
        }
    }

    /// Index name `idx_[schema_]<prefix><base>_<suffix>`.
    pub fn index_name(&self, base: &str, suffix: &str) -> String {
        if self.schema.is_empty() {
            format!("idx_{}{base}_{suffix}", self.prefix)
        } else {
            format!("idx_{}_{}{base}_{suffix}", self.schema, self.prefix)
        }
    }

    fn qualified_index(&self, base: &str, suffix: &str) -> String {
        let name = self.index_name(base, suffix);
        if self.schema.is_empty() {
            name
        } else {
            format!("{}.{name}", self.schema)
        }
    }

    fn pragma_schema(&self) -> &str {
        if self.schema.is_empty() {
            MAIN_SCHEMA
        } else {
            &self.schema
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::new("", "")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Expected column.
#[derive(Debug)]
pub struct ColumnSpec {
    /// Column name.
    pub name: &'static str,
    /// Declared type.
    pub sql_type: &'static str,
    /// Whether the column is `NOT NULL` (primary keys count as not null).
    pub not_null: bool,
    /// Default expression.
    pub default: Option<&'static str>,
    /// Whether this is the rowid primary key.
    pub primary_key: bool,
}

/// Expected index.
#[derive(Debug)]
pub struct IndexSpec {
    /// Name suffix (`unique_active`, `lookup`, `expires`).
    pub suffix: &'static str,
    /// Whether the index is unique.
    pub unique: bool,
    /// Indexed column list.
    pub columns: &'static str,
    /// Partial index predicate.
    pub predicate: Option<&'static str>,
}

/// Expected table.
#[derive(Debug)]
pub struct TableSpec {
    /// Base table name.
    pub base: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnSpec],
    /// Indexes.
    pub indexes: &'static [IndexSpec],
}

const fn col(name: &'static str, sql_type: &'static str, not_null: bool) -> ColumnSpec {
    ColumnSpec {
        name,
        sql_type,
        not_null,
        default: None,
        primary_key: false,
    }
}

const ID: ColumnSpec = ColumnSpec {
    name: "id",
    sql_type: "INTEGER",
    not_null: true,
    default: None,
    primary_key: true,
};
const APP_NAME: ColumnSpec = col("app_name", "TEXT", true);
const USER_ID: ColumnSpec = col("user_id", "TEXT", true);
const SESSION_ID: ColumnSpec = col("session_id", "TEXT", true);
const CREATED_AT: ColumnSpec = col("created_at", "TEXT", true);
const UPDATED_AT: ColumnSpec = col("updated_at", "TEXT", true);
const EXPIRES_AT: ColumnSpec = col("expires_at", "TEXT", false);
const DELETED_AT: ColumnSpec = col("deleted_at", "TEXT", false);

const EXPIRES_INDEX: IndexSpec = IndexSpec {
    suffix: "expires",
    unique: false,
    columns: "expires_at",
    predicate: Some("expires_at IS NOT NULL"),
};

const fn unique_active(columns: &'static str) -> IndexSpec {
    IndexSpec {
        suffix: "unique_active",
        unique: true,
        columns,
        predicate: Some("deleted_at IS NULL"),
    }
}

const fn lookup(columns: &'static str) -> IndexSpec {
    IndexSpec {
        suffix: "lookup",
        unique: false,
        columns,
        predicate: None,
    }
}

/// Every table the store owns.
pub static TABLES: &[TableSpec] = &[
    TableSpec {
        base: SESSION_STATES,
        columns: &[
            ID,
            APP_NAME,
            USER_ID,
            SESSION_ID,
            col("state", "TEXT", false),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[unique_active("app_name, user_id, session_id"), EXPIRES_INDEX],
    },
    TableSpec {
        base: SESSION_EVENTS,
        columns: &[
            ID,
            APP_NAME,
            USER_ID,
            SESSION_ID,
            col("event", "TEXT", true),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[lookup("app_name, user_id, session_id, created_at"), EXPIRES_INDEX],
    },
    TableSpec {
        base: SESSION_TRACK_EVENTS,
        columns: &[
            ID,
            APP_NAME,
            USER_ID,
            SESSION_ID,
            col("track", "TEXT", true),
            col("event", "TEXT", true),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[
            lookup("app_name, user_id, session_id, track, created_at"),
            EXPIRES_INDEX,
        ],
    },
    TableSpec {
        base: SESSION_SUMMARIES,
        columns: &[
            ID,
            APP_NAME,
            USER_ID,
            SESSION_ID,
            ColumnSpec {
                name: "filter_key",
                sql_type: "TEXT",
                not_null: true,
                default: Some("''"),
                primary_key: false,
            },
            col("summary", "TEXT", false),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[
            unique_active("app_name, user_id, session_id, filter_key"),
            EXPIRES_INDEX,
        ],
    },
    TableSpec {
        base: APP_STATES,
        columns: &[
            ID,
            APP_NAME,
            col("key", "TEXT", true),
            col("value", "BLOB", false),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[unique_active("app_name, key"), EXPIRES_INDEX],
    },
    TableSpec {
        base: USER_STATES,
        columns: &[
            ID,
            APP_NAME,
            USER_ID,
            col("key", "TEXT", true),
            col("value", "BLOB", false),
            CREATED_AT,
            UPDATED_AT,
            EXPIRES_AT,
            DELETED_AT,
        ],
        indexes: &[unique_active("app_name, user_id, key"), EXPIRES_INDEX],
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// DDL
// ─────────────────────────────────────────────────────────────────────────────

fn column_ddl(c: &ColumnSpec) -> String {
    let mut ddl = format!("{} {}", c.name, c.sql_type);
    if c.primary_key {
        ddl.push_str(" PRIMARY KEY AUTOINCREMENT");
    } else if c.not_null {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = c.default {
        ddl.push_str(" DEFAULT ");
        ddl.push_str(default);
    }
    ddl
}

/// `CREATE TABLE IF NOT EXISTS` for one table.
pub fn create_table_sql(names: &TableNames, spec: &TableSpec) -> String {
    let columns: Vec<String> = spec.columns.iter().map(column_ddl).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        names.qualified(spec.base),
        columns.join(",\n  ")
    )
}

/// `CREATE INDEX IF NOT EXISTS` for one index. The table in the `ON`
/// clause is unqualified; `SQLite` resolves it in the index's schema.
pub fn create_index_sql(names: &TableNames, spec: &TableSpec, index: &IndexSpec) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let predicate = index
        .predicate
        .map(|p| format!(" WHERE {p}"))
        .unwrap_or_default();
    format!(
        "CREATE {unique}INDEX IF NOT EXISTS {} ON {}({}){predicate}",
        names.qualified_index(spec.base, index.suffix),
        names.bare(spec.base),
        index.columns
    )
}

/// Create every table and index. Idempotent; runs in one transaction.
pub fn init_schema(conn: &Connection, names: &TableNames) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for spec in TABLES {
        let table = names.qualified(spec.base);
        debug!(table = %table, "creating table");
        tx.execute_batch(&create_table_sql(names, spec))
            .map_err(|e| StorageError::Schema {
                message: format!("failed to create table {table}: {e}"),
            })?;
        for index in spec.indexes {
            tx.execute_batch(&create_index_sql(names, spec, index))
                .map_err(|e| StorageError::Schema {
                    message: format!(
                        "failed to create index {}: {e}",
                        names.index_name(spec.base, index.suffix)
                    ),
                })?;
        }
    }
    tx.commit()?;
    info!(schema = names.pragma_schema(), prefix = names.prefix(), "schema ready");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

struct ActualColumn {
    sql_type: String,
    not_null: bool,
}

fn actual_columns(conn: &Connection, names: &TableNames, base: &str) -> Result<HashMap<String, ActualColumn>> {
    let mut stmt = conn.prepare(r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1, ?2)"#)?;
    let rows = stmt.query_map([names.bare(base), names.pragma_schema().to_string()], |row| {
        let not_null: bool = row.get(2)?;
        let pk: i64 = row.get(3)?;
        Ok((
            row.get::<_, String>(0)?,
            ActualColumn {
                sql_type: row.get(1)?,
                not_null: not_null || pk > 0,
            },
        ))
    })?;
    let mut out = HashMap::new();
    for row in rows {
        let (name, column) = row?;
        let _ = out.insert(name, column);
    }
    Ok(out)
}

fn actual_indexes(conn: &Connection, names: &TableNames, base: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1, ?2)")?;
    let rows = stmt.query_map([names.bare(base), names.pragma_schema().to_string()], |row| {
        row.get::<_, String>(0)
    })?;
    let mut out = HashSet::new();
    for name in rows {
        let _ = out.insert(name?);
    }
    Ok(out)
}

/// Compare the live schema against [`TABLES`].
///
/// Returns the names of missing indexes (each also logged at `warn`).
pub fn verify_schema(conn: &Connection, names: &TableNames) -> Result<Vec<String>> {
    let mut missing_indexes = Vec::new();
    for spec in TABLES {
        let table = names.qualified(spec.base);
        let columns = actual_columns(conn, names, spec.base)?;
        if columns.is_empty() {
            return Err(StorageError::Schema {
                message: format!("table {table} does not exist"),
            });
        }
        for expected in spec.columns {
            let Some(actual) = columns.get(expected.name) else {
                return Err(StorageError::Schema {
                    message: format!("table {table} is missing column {}", expected.name),
                });
            };
            if !actual.sql_type.eq_ignore_ascii_case(expected.sql_type) {
                return Err(StorageError::Schema {
                    message: format!(
                        "column {table}.{} has type {}, expected {}",
                        expected.name, actual.sql_type, expected.sql_type
                    ),
                });
            }
            if actual.not_null != expected.not_null {
                return Err(StorageError::Schema {
                    message: format!(
                        "column {table}.{} nullability mismatch (not null: {}, expected {})",
                        expected.name, actual.not_null, expected.not_null
                    ),
                });
            }
        }
        let indexes = actual_indexes(conn, names, spec.base)?;
        for index in spec.indexes {
            let name = names.index_name(spec.base, index.suffix);
            if !indexes.contains(&name) {
                warn!(table = %table, index = %name, "index missing");
                missing_indexes.push(name);
            }
        }
    }
    debug!(missing_indexes = missing_indexes.len(), "schema verified");
    Ok(missing_indexes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
