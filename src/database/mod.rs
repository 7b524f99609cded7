pub mod redis_connection;
pub mod settings;

pub use redis_connection::RedisDatabase;
pub use settings::*;
