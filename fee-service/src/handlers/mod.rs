//! HTTP handlers for fee-service.
//!
//! Handlers stay thin: request validation through `ValidatedJson`, one call
//! into the service layer, response shaping. Transactional behavior lives
//! in `services::ingest` and `services::billing`.

pub mod billing;
pub mod ledger;
pub mod payments;
pub mod unmatched;
pub mod webhooks;
