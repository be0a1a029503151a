//! `SQLite` backend for the session store.
//!
//! # Architecture
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode and performance
//!   pragmas on every connection, optional attached schema database, and a
//!   process-wide registry of named pools.
//! - **[`client`]**: the exec / query / transaction primitives.
//! - **[`schema`]**: table naming, idempotent DDL, and schema verification.
//! - **[`row_types`]**: raw row shapes and column codecs.
//! - **[`repositories`]**: stateless repository structs, one per table. Each
//!   method takes `&Connection` and executes SQL.

pub mod client;
pub mod connection;
pub mod repositories;
pub mod row_types;
pub mod schema;

pub use client::StorageClient;
pub use connection::{
    AttachedDatabase, ConnectionConfig, ConnectionPool, ConnectionTarget, PooledConnection,
    PragmaState, instance, new_file, new_from_dsn, new_in_memory, register_instance,
    schema_database_path, unregister_instance, verify_pragmas,
};
pub use schema::{TableNames, init_schema, verify_schema};
