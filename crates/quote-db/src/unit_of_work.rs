//! # Unit of Work
//!
//! Typed access to repositories over exactly one connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  let mut uow = db.begin().await?;          BEGIN                        │
//! │  uow.quotes().insert(&quote).await?;        ┐                           │
//! │  uow.line_items().insert_many(..).await?;   │ same transaction          │
//! │  uow.versions().insert(&v).await?;          ┘                           │
//! │  uow.commit().await?;                      COMMIT                       │
//! │                                                                         │
//! │  early return via `?`  ──► uow dropped ──► ROLLBACK                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::Repositories;

/// One open transaction.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        UnitOfWork { tx }
    }

    pub async fn commit(self) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| match DbError::from(e) {
                busy @ DbError::Busy(_) => busy,
                other => DbError::TransactionFailed(other.to_string()),
            })?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl Repositories for UnitOfWork {
    fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}

/// One pooled connection without a transaction, for reads.
pub struct Session {
    conn: PoolConnection<Sqlite>,
}

impl Session {
    pub(crate) fn new(conn: PoolConnection<Sqlite>) -> Self {
        Session { conn }
    }
}

impl Repositories for Session {
    fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}
