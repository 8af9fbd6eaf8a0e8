use sqlx::{Connection, Database};

use crate::Result;

/// Connect options of a database, i.e. an unopened connection handle.
pub type ConnectOptionsOf<DB> = <<DB as Database>::Connection as Connection>::Options;

/// Produces a new, unopened connection for every invocation.
///
/// Implemented for any `Fn() -> ConnectOptions` closure, so the connection
/// parameters can be captured by the closure and injected at construction.
pub trait ConnectionFactory<DB: Database>: Send + Sync {
    fn create(&self) -> Result<ConnectOptionsOf<DB>>;
}

impl<DB, F> ConnectionFactory<DB> for F
where
    DB: Database,
    F: Fn() -> ConnectOptionsOf<DB> + Send + Sync,
{
    fn create(&self) -> Result<ConnectOptionsOf<DB>> {
        Ok(self())
    }
}

/// Factory handing out copies of fixed connect options.
pub struct ConnectOptionsFactory<DB: Database> {
    options: ConnectOptionsOf<DB>,
}

impl<DB: Database> ConnectOptionsFactory<DB> {
    pub fn new(options: ConnectOptionsOf<DB>) -> Self {
        Self { options }
    }
}

impl<DB: Database> ConnectionFactory<DB> for ConnectOptionsFactory<DB> {
    fn create(&self) -> Result<ConnectOptionsOf<DB>> {
        Ok(self.options.clone())
    }
}
