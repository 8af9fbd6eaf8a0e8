pub mod entities;
pub mod observers;
pub mod repositories;

pub use entities::{Count, UserRecord};
pub use observers::{Lifecycle, LifecycleCounter};
pub use repositories::UserRepository;
