//! SQLite persistence layer: connection pooling and schema migrations.

pub mod migrations;
pub mod pool;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
