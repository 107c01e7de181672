//! Single writer actor. Every mutation runs here, one job at a time, each
//! inside its own `IMMEDIATE` transaction.
//!
//! A job that panics is answered with an internal error and its transaction
//! is rolled back. If the rollback fails the writer takes a fresh connection.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::sqlite::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use tillsync_core::errors::{DatabaseError, Error, Result};

use super::{get_connection, DbPool};
use crate::errors::StorageError;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

const WRITE_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::Sender<WriteJob>,
}

impl WriteHandle {
    /// Run `job` in a transaction on the writer connection. The transaction
    /// commits when the job returns `Ok` and rolls back otherwise; the
    /// returned future resolves after commit.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let wrapped: WriteJob = Box::new(move |conn: &mut SqliteConnection| {
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                conn.immediate_transaction::<T, StorageError, _>(|tx| {
                    job(tx).map_err(StorageError::from)
                })
                .map_err(Error::from)
            }));
            match attempt {
                Ok(result) => {
                    let _ = reply_tx.send(result);
                }
                Err(payload) => {
                    let _ = reply_tx.send(Err(Error::Database(DatabaseError::Internal(
                        "write job panicked".to_string(),
                    ))));
                    panic::resume_unwind(payload);
                }
            }
        });

        self.sender.send(wrapped).await.map_err(|_| {
            Error::from(StorageError::WriterUnavailable(
                "writer actor has stopped".to_string(),
            ))
        })?;

        reply_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "writer dropped the job without replying".to_string(),
            ))
        })?
    }
}

/// Start the writer on a dedicated thread holding one pooled connection.
pub fn spawn_writer(pool: Arc<DbPool>) -> Result<WriteHandle> {
    let mut conn = get_connection(&pool)?;
    let (sender, mut receiver) = mpsc::channel::<WriteJob>(WRITE_QUEUE_CAPACITY);

    std::thread::Builder::new()
        .name("tillsync-writer".to_string())
        .spawn(move || {
            debug!("Writer actor started");
            while let Some(job) = receiver.blocking_recv() {
                if panic::catch_unwind(AssertUnwindSafe(|| job(&mut conn))).is_ok() {
                    continue;
                }
                error!("Write job panicked, rolling back");
                let rolled_back =
                    AnsiTransactionManager::rollback_transaction(&mut *conn).is_ok();
                if rolled_back {
                    continue;
                }
                match get_connection(&pool) {
                    Ok(fresh) => conn = fresh,
                    Err(err) => {
                        error!("Writer could not reconnect: {}", err);
                        break;
                    }
                }
            }
            debug!("Writer actor stopped");
        })
        .map_err(|e| {
            error!("Failed to spawn writer thread: {}", e);
            Error::from(StorageError::WriterUnavailable(e.to_string()))
        })?;

    Ok(WriteHandle { sender })
}
