//! Transactional Executor
//!
//! Runs units of work against PostgreSQL or SQLite, each inside its own
//! connection and transaction: commit on success, rollback on failure, and the
//! connection released on every exit path. Thin helpers execute single
//! statements and map rows to typed results via `sqlx::FromRow`.

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod factory;
pub mod params;
pub mod transaction_aware;
pub mod unit_of_work;

pub use backend::{Backend, TransactionCommand};
pub use config::{ExecutorConfig, DEFAULT_COMMAND_TIMEOUT_SECS};
pub use error::{Error, ErrorKind, Result};
pub use executor::Executor;
pub use factory::{ConnectOptionsFactory, ConnectOptionsOf, ConnectionFactory};
pub use params::{IntoParams, Params, Statement, Value};
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{
    ExecutorBuilder, PgTransactionalExecutor, SqliteTransactionalExecutor, TransactionalExecutor,
};
