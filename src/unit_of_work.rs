use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sqlx::{Connection, Database, FromRow, Postgres, Sqlite};
use tracing::{debug, error, warn};

use crate::backend::{Backend, TransactionCommand};
use crate::config::{ExecutorConfig, DEFAULT_COMMAND_TIMEOUT_SECS};
use crate::factory::{ConnectOptionsFactory, ConnectOptionsOf, ConnectionFactory};
use crate::params::IntoParams;
use crate::{Error, Executor, Result, TransactionAware};

/// Runs units of work inside their own connection and transaction.
///
/// Every call to [`run`](Self::run) (and to the `execute`/`get_one`/`get_many`
/// helpers built on it) opens one connection, begins one transaction, commits
/// it when the unit of work succeeds or rolls it back when it fails, and closes
/// the connection before returning. Nothing is shared between invocations
/// except the connection factory, so overlapping calls need no coordination.
pub struct TransactionalExecutor<DB: Backend> {
    factory: Arc<dyn ConnectionFactory<DB>>,
    command_timeout: Duration,
    observers: Arc<RwLock<Vec<Arc<dyn TransactionAware>>>>,
}

pub type PgTransactionalExecutor = TransactionalExecutor<Postgres>;
pub type SqliteTransactionalExecutor = TransactionalExecutor<Sqlite>;

impl<DB: Backend> Clone for TransactionalExecutor<DB> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            command_timeout: self.command_timeout,
            observers: Arc::clone(&self.observers),
        }
    }
}

impl<DB: Backend> std::fmt::Debug for TransactionalExecutor<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalExecutor")
            .field("command_timeout", &self.command_timeout)
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

impl<DB: Backend> TransactionalExecutor<DB> {
    /// Create an executor with the default 20 second command timeout.
    pub fn new<F>(factory: F) -> Self
    where
        F: ConnectionFactory<DB> + 'static,
    {
        Self {
            factory: Arc::new(factory),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn builder() -> ExecutorBuilder<DB> {
        ExecutorBuilder::default()
    }

    /// Create an executor connecting to `url`.
    ///
    /// The URL is parsed once; an empty or malformed URL is a configuration error.
    pub fn from_url(url: &str) -> Result<Self> {
        Self::from_config(&ExecutorConfig::new(url))
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let options: ConnectOptionsOf<DB> = config
            .database_url()?
            .parse()
            .map_err(|e: sqlx::Error| Error::configuration(format!("invalid database URL: {e}")))?;

        Self::builder()
            .connection_factory(ConnectOptionsFactory::<DB>::new(options))
            .command_timeout(config.command_timeout())
            .build()
    }

    /// Create an executor from `DATABASE_URL` and `DATABASE_COMMAND_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_config(&ExecutorConfig::from_env()?)
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Register a component that needs to be notified of transaction events.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    /// Run `unit_of_work` inside a new transaction.
    ///
    /// The transaction is committed when the unit of work returns `Ok` and rolled
    /// back when it returns `Err`; that error is handed back to the caller as is.
    /// If the rollback itself fails, the original error still wins and the
    /// rollback failure is logged. The connection is closed on every path,
    /// including when the returned future is dropped before completion.
    ///
    /// When a statement overruns the command timeout the connection is discarded
    /// without commit or rollback, since the driver may still be running that
    /// statement; the server drops the open transaction with the connection. A unit
    /// of work that swallows the timeout and returns `Ok` still gets
    /// [`Error::Timeout`].
    pub async fn run<T, E, F, Fut>(&self, unit_of_work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Executor<DB>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let options = self.factory.create()?;
        let conn = <DB::Connection as Connection>::connect_with(&options)
            .await
            .map_err(Error::Connection)?;

        let observers = self.observers.read().clone();
        let scope = TransactionScope::open(Executor::new(conn, self.command_timeout), observers);

        if let Err(e) = scope.executor.control(TransactionCommand::Begin).await {
            scope.release().await;
            return Err(e.into());
        }

        let outcome = unit_of_work(scope.executor.clone()).await;

        if scope.executor.timed_out() {
            scope.abandon();
            return match outcome {
                Ok(_) => Err(Error::Timeout(self.command_timeout).into()),
                Err(e) => Err(e),
            };
        }

        let outcome = match outcome {
            Ok(value) => scope.commit().await.map(|()| value).map_err(E::from),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            scope.rollback().await;
        }

        scope.release().await;
        outcome
    }

    /// Run a mutating statement in its own transaction and return the number of
    /// rows affected.
    pub async fn execute<P>(&self, sql: &str, params: P) -> Result<u64>
    where
        P: IntoParams,
    {
        self.run(move |executor| async move { executor.execute(sql, params).await })
            .await
    }

    /// Run a query returning exactly one row and map it to `T` by column name.
    ///
    /// Zero or several rows fail with [`Error::RowCount`].
    pub async fn get_one<T, P>(&self, sql: &str, params: P) -> Result<T>
    where
        T: for<'r> FromRow<'r, <DB as Database>::Row> + Send + Unpin,
        P: IntoParams,
    {
        self.run(move |executor| async move { executor.get_one(sql, params).await })
            .await
    }

    /// Run a query and map every row to `T`, in result-set order.
    pub async fn get_many<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, <DB as Database>::Row> + Send + Unpin,
        P: IntoParams,
    {
        self.run(move |executor| async move { executor.get_many(sql, params).await })
            .await
    }
}

/// Builder for [`TransactionalExecutor`] that validates its inputs.
pub struct ExecutorBuilder<DB: Backend> {
    factory: Option<Arc<dyn ConnectionFactory<DB>>>,
    command_timeout: Duration,
    observers: Vec<Arc<dyn TransactionAware>>,
}

impl<DB: Backend> Default for ExecutorBuilder<DB> {
    fn default() -> Self {
        Self {
            factory: None,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            observers: Vec::new(),
        }
    }
}

impl<DB: Backend> ExecutorBuilder<DB> {
    pub fn connection_factory<F>(mut self, factory: F) -> Self
    where
        F: ConnectionFactory<DB> + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransactionAware>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<TransactionalExecutor<DB>> {
        let factory = self
            .factory
            .ok_or_else(|| Error::configuration("a connection factory is required"))?;
        if self.command_timeout.is_zero() {
            return Err(Error::configuration(
                "command timeout must be greater than 0",
            ));
        }

        Ok(TransactionalExecutor {
            factory,
            command_timeout: self.command_timeout,
            observers: Arc::new(RwLock::new(self.observers)),
        })
    }
}

/// One connection and the transaction running on it, for a single invocation.
struct TransactionScope<DB: Backend> {
    executor: Executor<DB>,
    observers: Vec<Arc<dyn TransactionAware>>,
    released: bool,
}

impl<DB: Backend> TransactionScope<DB> {
    fn open(executor: Executor<DB>, observers: Vec<Arc<dyn TransactionAware>>) -> Self {
        debug!("Connection opened");
        for observer in &observers {
            observer.on_connection_opened();
        }
        Self {
            executor,
            observers,
            released: false,
        }
    }

    async fn commit(&self) -> Result<()> {
        self.executor.control(TransactionCommand::Commit).await?;
        for observer in &self.observers {
            observer.on_commit();
        }
        Ok(())
    }

    async fn rollback(&self) {
        match self.executor.control(TransactionCommand::Rollback).await {
            Ok(()) => {
                for observer in &self.observers {
                    observer.on_rollback();
                }
            }
            Err(e) => error!(error = %e, "Rollback failed; returning the original error"),
        }
    }

    async fn release(mut self) {
        if let Some(conn) = self.executor.take_connection().await {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close connection");
            }
        }
        self.released = true;
        self.notify_closed();
    }

    /// Drop the connection without resolving the transaction.
    fn abandon(mut self) {
        warn!(
            timeout = ?self.executor.command_timeout(),
            "Statement timed out; discarding connection without rollback"
        );
        self.discard();
    }

    fn discard(&mut self) {
        self.released = true;
        match self.executor.try_take_connection() {
            Some(conn) => {
                // Dropping the connection closes it; the server discards the
                // open transaction.
                drop(conn);
                self.notify_closed();
            }
            None => warn!(
                "Connection still held by an executor handle; it closes when the last handle is dropped"
            ),
        }
    }

    fn notify_closed(&self) {
        debug!("Connection released");
        for observer in &self.observers {
            observer.on_connection_closed();
        }
    }
}

impl<DB: Backend> Drop for TransactionScope<DB> {
    fn drop(&mut self) {
        if !self.released {
            self.discard();
        }
    }
}
