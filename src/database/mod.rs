pub mod kv_rest_connection;
pub mod kv_store;
pub mod memory_store;
pub mod redis_connection;
pub mod session;

pub use kv_rest_connection::*;
pub use kv_store::*;
pub use memory_store::*;
pub use redis_connection::*;
