pub mod schema;
pub mod sqlite;
pub mod vector;

pub use sqlite::SqliteStore;
pub use vector::VectorIndexConfig;
