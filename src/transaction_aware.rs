/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Observers are registered with a
/// [`TransactionalExecutor`](crate::TransactionalExecutor) and called for every
/// invocation. Callbacks are synchronous because the connection is also released
/// from `Drop` when an invocation is cancelled; keep them short and non-blocking.
pub trait TransactionAware: Send + Sync {
    /// Called once the connection for an invocation has been opened.
    fn on_connection_opened(&self) {}

    /// Called after a successful transaction commit.
    fn on_commit(&self) {}

    /// Called after a successful transaction rollback.
    ///
    /// Not called when the rollback statement itself fails.
    fn on_rollback(&self) {}

    /// Called once the connection has been released, on every exit path.
    fn on_connection_closed(&self) {}
}
