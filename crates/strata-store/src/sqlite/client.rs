//! Storage client: the three primitives every repository call goes through.
//!
//! - [`exec`](StorageClient::exec) runs one statement and returns the number
//!   of affected rows.
//! - [`query`](StorageClient::query) streams rows into a handler; the
//!   statement and its cursor are released on every exit path.
//! - [`transaction`](StorageClient::transaction) runs a closure inside an
//!   `IMMEDIATE` transaction, committing on `Ok` and rolling back on `Err`
//!   or panic.
//!
//! A checked-out connection is bounded by the caller's deadline: its busy
//! timeout is lowered to the time left, and a lock wait that runs past the
//! deadline surfaces as [`ContextError::DeadlineExceeded`].

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::{Connection, Params, Row, Transaction, TransactionBehavior};
use strata_core::{Context, ContextError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{Result, StorageError};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};

/// Shared handle over the connection pool.
#[derive(Debug)]
pub struct StorageClient {
    pool: ConnectionPool,
    closed: AtomicBool,
}

impl StorageClient {
    /// Wrap a pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Check out a connection bounded by `ctx`, failing fast when closed or
    /// cancelled.
    pub fn conn(&self, ctx: &Context) -> Result<BoundConnection> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        ctx.check()?;
        BoundConnection::new(self.pool.get()?, ctx.deadline())
    }

    /// Run `body` on one bounded connection.
    pub fn with_conn<T, F>(&self, ctx: &Context, body: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn(ctx)?;
        let out = body(&*conn);
        conn.settle(ctx, out)
    }

    /// Run one statement. Returns the number of affected rows.
    pub fn exec<P: Params>(&self, ctx: &Context, sql: &str, params: P) -> Result<usize> {
        self.with_conn(ctx, |conn| Ok(conn.execute(sql, params)?))
    }

    /// Run a query, passing each row to `handler`. The first handler error
    /// stops iteration and is returned.
    pub fn query<P, F>(&self, ctx: &Context, sql: &str, params: P, mut handler: F) -> Result<()>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> Result<()>,
    {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let mut rows = stmt.query(params)?;
            while let Some(row) = rows.next()? {
                handler(row)?;
            }
            Ok(())
        })
    }

    /// Run `body` in an `IMMEDIATE` transaction.
    ///
    /// Commits when `body` returns `Ok`. An `Err` or a panic drops the
    /// transaction, which rolls it back; the panic then continues unwinding.
    pub fn transaction<T, F>(&self, ctx: &Context, body: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn(ctx)?;
        let out = run_transaction(&mut *conn, body);
        conn.settle(ctx, out)
    }

    /// Refuse further work. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            debug!("storage client closed");
        }
        first
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn run_transaction<T, F>(conn: &mut Connection, body: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = body(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Pooled connection whose busy timeout is capped by a deadline. The
/// pool's busy timeout is put back when it is dropped.
pub struct BoundConnection {
    conn: PooledConnection,
    restore: Option<Duration>,
}

impl BoundConnection {
    fn new(conn: PooledConnection, deadline: Option<Instant>) -> Result<Self> {
        let Some(deadline) = deadline else {
            return Ok(Self { conn, restore: None });
        };
        let configured: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
        let configured = Duration::from_millis(u64::try_from(configured).unwrap_or(0));
        // round up so a lock wait gives up after the deadline, not before it
        let left = deadline.saturating_duration_since(Instant::now()) + Duration::from_millis(1);
        if left >= configured {
            return Ok(Self { conn, restore: None });
        }
        conn.busy_timeout(left)?;
        Ok(Self {
            conn,
            restore: Some(configured),
        })
    }

    /// Whether the deadline, not the pool setting, bounds lock waits.
    pub fn is_deadline_bound(&self) -> bool {
        self.restore.is_some()
    }

    /// Report a lock wait cut short by the deadline as the context error.
    fn settle<T>(&self, ctx: &Context, out: Result<T>) -> Result<T> {
        match out {
            Err(e) if e.is_transient() => match ctx.err() {
                Some(reason) => Err(reason.into()),
                None if self.is_deadline_bound() => Err(ContextError::DeadlineExceeded.into()),
                None => Err(e),
            },
            other => other,
        }
    }
}

impl Deref for BoundConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for BoundConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for BoundConnection {
    fn drop(&mut self) {
        if let Some(configured) = self.restore {
            if let Err(e) = self.conn.busy_timeout(configured) {
                warn!(error = %e, "failed to restore busy timeout");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
