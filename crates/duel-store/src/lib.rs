pub mod battles;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod storage;
pub mod users;

pub use battles::BattleRow;
pub use database::Database;
pub use error::StoreError;
pub use storage::{SqliteStorage, Storage};
pub use users::UserRow;
