//! Database backends the executor can drive.
//!
//! Each backend knows its transaction control statements, its placeholder
//! syntax and how to bind a [`Value`] with the driver's native types.

use async_trait::async_trait;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgConnection, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Database, Executor as _, Postgres, Sqlite};

use crate::params::{Statement, Value};

/// Transaction control issued by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCommand {
    Begin,
    Commit,
    Rollback,
}

#[async_trait]
pub trait Backend: Database {
    /// Statement opening a transaction.
    const BEGIN: &'static str = "BEGIN";
    const COMMIT: &'static str = "COMMIT";
    const ROLLBACK: &'static str = "ROLLBACK";

    /// Positional placeholder for the 1-based `index`.
    fn placeholder(index: usize) -> String;

    /// Run a statement and return the number of rows affected.
    async fn execute(conn: &mut Self::Connection, statement: &Statement) -> Result<u64, sqlx::Error>;

    /// Run a statement and return every row, in result-set order.
    async fn fetch_all(
        conn: &mut Self::Connection,
        statement: &Statement,
    ) -> Result<Vec<Self::Row>, sqlx::Error>;

    /// Issue a transaction control statement.
    async fn control(
        conn: &mut Self::Connection,
        command: TransactionCommand,
    ) -> Result<(), sqlx::Error>;

    fn control_sql(command: TransactionCommand) -> &'static str {
        match command {
            TransactionCommand::Begin => Self::BEGIN,
            TransactionCommand::Commit => Self::COMMIT,
            TransactionCommand::Rollback => Self::ROLLBACK,
        }
    }
}

#[async_trait]
impl Backend for Postgres {
    fn placeholder(index: usize) -> String {
        format!("${index}")
    }

    async fn execute(conn: &mut PgConnection, statement: &Statement) -> Result<u64, sqlx::Error> {
        let query = statement
            .values()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_postgres_param);
        Ok(query.execute(conn).await?.rows_affected())
    }

    async fn fetch_all(
        conn: &mut PgConnection,
        statement: &Statement,
    ) -> Result<Vec<PgRow>, sqlx::Error> {
        let query = statement
            .values()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_postgres_param);
        query.fetch_all(conn).await
    }

    async fn control(
        conn: &mut PgConnection,
        command: TransactionCommand,
    ) -> Result<(), sqlx::Error> {
        conn.execute(Self::control_sql(command)).await.map(|_| ())
    }
}

#[async_trait]
impl Backend for Sqlite {
    // Take the write lock up front so concurrent writers wait on the busy
    // handler instead of failing on lock upgrade.
    const BEGIN: &'static str = "BEGIN IMMEDIATE";

    fn placeholder(index: usize) -> String {
        format!("?{index}")
    }

    async fn execute(
        conn: &mut SqliteConnection,
        statement: &Statement,
    ) -> Result<u64, sqlx::Error> {
        let query = statement
            .values()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_sqlite_param);
        Ok(query.execute(conn).await?.rows_affected())
    }

    async fn fetch_all(
        conn: &mut SqliteConnection,
        statement: &Statement,
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        let query = statement
            .values()
            .iter()
            .fold(sqlx::query(statement.sql()), bind_sqlite_param);
        query.fetch_all(conn).await
    }

    async fn control(
        conn: &mut SqliteConnection,
        command: TransactionCommand,
    ) -> Result<(), sqlx::Error> {
        conn.execute(Self::control_sql(command)).await.map(|_| ())
    }
}

/// NULL sent with an unspecified type so the server infers it from context.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Uuid(v) => query.bind(*v),
    }
}

fn bind_sqlite_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // Stored as hyphenated text so rows stay readable from the sqlite shell.
        Value::Uuid(v) => query.bind(v.to_string()),
    }
}
