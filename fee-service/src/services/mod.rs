//! Services module for fee-service.

pub mod aggregator;
pub mod billing;
pub mod carryover;
pub mod database;
pub mod ingest;
pub mod metrics;
pub mod term_resolver;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
