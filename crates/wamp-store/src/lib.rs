pub mod database;
pub mod error;
pub mod ping;
pub mod schema;
pub mod tokens;

pub use database::Database;
pub use error::StoreError;
pub use ping::{DatabasePing, Pingable};
pub use tokens::SqliteDriver;
