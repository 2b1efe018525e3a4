pub mod error;
pub mod port;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use port::Store;
pub use sqlite::SqliteStore;
