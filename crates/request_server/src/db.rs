//! Database context contract and the PostgreSQL implementation.
//!
//! The dispatch loop only depends on the [`DatabaseContext`] trait: a
//! transaction boundary (`begin`/`commit`/`rollback`) plus one distinguished
//! error, the synchronization conflict, which signals a serialization
//! failure the transport should retry. One context exists per worker,
//! created at node start and used exclusively by that worker.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use thiserror::Error;

/// Errors raised by a database context.
#[derive(Debug, Error)]
pub enum DbError {
    /// The transaction serialization failed; the request should be retried.
    #[error("serialization conflict; the request should be retried")]
    SynchronizationConflict,

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Per-worker transactional database handle.
///
/// `commit_transaction` may fail; the dispatcher responds to that with a
/// single rollback and a `SERVER_ERROR` response. Any operation may raise
/// [`DbError::SynchronizationConflict`] to signal a serialization failure.
#[async_trait]
pub trait DatabaseContext: Send {
    async fn begin_transaction(&mut self) -> Result<(), DbError>;
    async fn commit_transaction(&mut self) -> Result<(), DbError>;
    async fn rollback_transaction(&mut self) -> Result<(), DbError>;
}

/// PostgreSQL-backed context over an `sqlx` pool.
///
/// The pool is shared across workers; each worker's context owns at most one
/// open transaction at a time. Handlers that know their concrete context can
/// reach the open transaction through [`PgDatabaseContext::transaction`].
pub struct PgDatabaseContext {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgDatabaseContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// The currently open transaction, if `begin_transaction` has run.
    pub fn transaction(&mut self) -> Option<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut()
    }
}

#[async_trait]
impl DatabaseContext for PgDatabaseContext {
    async fn begin_transaction(&mut self) -> Result<(), DbError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), DbError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }

    async fn rollback_transaction(&mut self) -> Result<(), DbError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(map_sqlx_error),
            None => Ok(()),
        }
    }
}

/// Maps PostgreSQL serialization failures (SQLSTATE 40001) and deadlocks
/// (40P01) to the retryable conflict; everything else is opaque.
fn map_sqlx_error(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return DbError::SynchronizationConflict;
        }
    }
    DbError::Database(err.to_string())
}
