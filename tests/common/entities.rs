use serde::Serialize;

/// Row of the `users` test table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
}

impl UserRecord {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct Count {
    pub count: i64,
}
