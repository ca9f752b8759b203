pub mod connection_pool;
pub mod local_feed;
pub mod sqlite_backend;

pub use connection_pool::ConnectionPool;
pub use local_feed::LocalChangeFeed;
pub use sqlite_backend::SqliteBackend;
