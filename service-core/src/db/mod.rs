pub mod retry;

pub use retry::{RetryConfig, is_transient, retry_db_op};
