use sqlx::{Database, FromRow};

use transactional_executor::{Backend, Executor, Params, Result};

use super::entities::{Count, UserRecord};

/// User repository working inside the transaction of its executor
pub struct UserRepository<DB: Backend> {
    executor: Executor<DB>,
}

impl<DB: Backend> UserRepository<DB>
where
    UserRecord: for<'r> FromRow<'r, <DB as Database>::Row>,
    Count: for<'r> FromRow<'r, <DB as Database>::Row>,
{
    pub fn new(executor: Executor<DB>) -> Self {
        Self { executor }
    }

    pub async fn create(&self, user: &UserRecord) -> Result<()> {
        self.executor
            .execute(
                "INSERT INTO users (id, name) VALUES (@id, @name)",
                Params::from_object(user)?,
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .executor
            .get_many(
                "SELECT id, name FROM users WHERE id = @id",
                Params::new().bind("id", id),
            )
            .await?;
        Ok(users.pop())
    }

    pub async fn count(&self) -> Result<i64> {
        let row: Count = self
            .executor
            .get_one("SELECT COUNT(*) AS count FROM users", ())
            .await?;
        Ok(row.count)
    }
}
