//! Snowflake client: session login, statement execution and PUT file transfer.
//!
//! Only stages with server-side encryption (`SNOWFLAKE_SSE`) are supported
//! by the built-in transfer.

pub mod models;
pub mod session;
pub mod transfer;

pub use session::{Snowflake, SnowflakeSession};
pub use transfer::PutOptions;
