//! # strata-store
//!
//! `SQLite`-backed conversational session service.
//!
//! - **[`sqlite`]**: connection pool, storage client, schema, and per-table repositories
//! - **[`store`]**: the storage protocols (create, load, append, delete, state CRUD, sweep)
//! - **[`persist`]**: hash-sharded async persistence workers
//! - **[`summary_pool`]**: hash-sharded async summary workers with branch-to-full cascade
//! - **[`cleanup`]**: periodic TTL sweep
//! - **[`service`]**: the [`SessionService`] façade with hook chains
//!
//! ## Quick start
//!
//! ```ignore
//! let svc = SessionService::new(ServiceOptions::default().with_path("sessions.db")).await?;
//! let session = svc.create_session(&ctx, &Key::new("app", "user", ""), &StateMap::new()).await?;
//! svc.append_event(&ctx, &session, event, &Options::default()).await?;
//! ```

#![deny(unsafe_code)]

pub mod cleanup;
pub mod errors;
pub mod options;
pub mod persist;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod summary_pool;

pub use cleanup::CleanupTask;
pub use errors::{StorageError, StorageErrorClass, WithOp};
pub use options::ServiceOptions;
pub use persist::{PERSIST_JOB_TIMEOUT, PersistPool};
pub use service::{SessionService, init_db};
pub use sqlite::repositories::expiry::{SweepCounts, SweepPolicy};
pub use sqlite::{ConnectionConfig, StorageClient, TableNames, register_instance};
pub use store::{SessionStore, StorePolicy, expires_after};
pub use summary_pool::{SummaryJob, SummaryPool};
