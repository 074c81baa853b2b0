//! service-core: Shared infrastructure for the school administration services.
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod utils;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use validator;
