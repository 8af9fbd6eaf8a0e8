use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::FromRow;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use crate::backend::{Backend, TransactionCommand};
use crate::params::{IntoParams, Statement};
use crate::{Error, Result};

/// Executor is the handle a unit of work uses to reach its transaction.
///
/// It shares the invocation's open connection (already inside a transaction)
/// together with the command timeout that bounds each statement. Clones are
/// cheap and all refer to the same connection; once the transaction has been
/// resolved every clone fails with [`Error::ScopeClosed`].
///
/// A statement that overruns the timeout may still be running in the driver,
/// so after a timeout every further statement on the handle fails with
/// [`Error::Timeout`] instead of queueing behind it.
pub struct Executor<DB: Backend> {
    conn: Arc<Mutex<Option<DB::Connection>>>,
    command_timeout: Duration,
    timed_out: Arc<AtomicBool>,
}

impl<DB: Backend> Clone for Executor<DB> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            command_timeout: self.command_timeout,
            timed_out: Arc::clone(&self.timed_out),
        }
    }
}

impl<DB: Backend> std::fmt::Debug for Executor<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl<DB: Backend> Executor<DB> {
    pub(crate) fn new(conn: DB::Connection, command_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            command_timeout,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Timeout applied to every statement sent through this executor.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Run a mutating statement and return the number of rows affected.
    pub async fn execute<P: IntoParams>(&self, sql: &str, params: P) -> Result<u64> {
        let statement = Statement::prepare::<DB>(sql, &params.into_params()?)?;
        let mut guard = self.conn.lock().await;
        self.ensure_usable()?;
        let conn = guard.as_mut().ok_or(Error::ScopeClosed)?;

        debug!(
            sql = %statement.sql(),
            params = statement.values().len(),
            timeout_secs = self.command_timeout.as_secs(),
            "Executing statement"
        );
        self.bounded(DB::execute(conn, &statement)).await
    }

    /// Run a query expected to return exactly one row and map it to `T`.
    pub async fn get_one<T, P>(&self, sql: &str, params: P) -> Result<T>
    where
        T: for<'r> FromRow<'r, DB::Row> + Send + Unpin,
        P: IntoParams,
    {
        let rows = self.fetch(sql, params).await?;
        match rows.as_slice() {
            [row] => T::from_row(row).map_err(Error::Mapping),
            _ => Err(Error::RowCount(rows.len())),
        }
    }

    /// Run a query and map every row to `T`, preserving row order.
    pub async fn get_many<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, DB::Row> + Send + Unpin,
        P: IntoParams,
    {
        let rows = self.fetch(sql, params).await?;
        rows.iter()
            .map(|row| T::from_row(row).map_err(Error::Mapping))
            .collect()
    }

    /// Direct access to the driver connection for queries the helpers do not cover.
    ///
    /// Statements issued this way run inside the transaction but are not bounded
    /// by the command timeout. Do not commit or roll back through it.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, DB::Connection>> {
        let guard = self.conn.lock().await;
        self.ensure_usable()?;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| Error::ScopeClosed)
    }

    /// Whether a statement on this connection overran the command timeout.
    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.timed_out() {
            return Err(Error::Timeout(self.command_timeout));
        }
        Ok(())
    }

    async fn fetch<P: IntoParams>(&self, sql: &str, params: P) -> Result<Vec<DB::Row>> {
        let statement = Statement::prepare::<DB>(sql, &params.into_params()?)?;
        let mut guard = self.conn.lock().await;
        self.ensure_usable()?;
        let conn = guard.as_mut().ok_or(Error::ScopeClosed)?;

        debug!(
            sql = %statement.sql(),
            params = statement.values().len(),
            timeout_secs = self.command_timeout.as_secs(),
            "Executing query"
        );
        self.bounded(DB::fetch_all(conn, &statement)).await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                self.timed_out.store(true, Ordering::Release);
                Err(Error::Timeout(self.command_timeout))
            }
        }
    }

    pub(crate) async fn control(&self, command: TransactionCommand) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::ScopeClosed)?;
        debug!(command = ?command, "Transaction control");
        DB::control(conn, command).await.map_err(Error::from)
    }

    /// Takes ownership of the connection, leaving None in its place.
    /// This should only be called when releasing the scope.
    pub(crate) async fn take_connection(&self) -> Option<DB::Connection> {
        self.conn.lock().await.take()
    }

    /// Non-blocking variant of [`take_connection`](Self::take_connection) for drop paths.
    ///
    /// Returns None when another handle currently holds the connection.
    pub(crate) fn try_take_connection(&self) -> Option<DB::Connection> {
        self.conn.try_lock().ok().and_then(|mut guard| guard.take())
    }
}
