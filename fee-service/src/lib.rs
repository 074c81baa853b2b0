//! Fee ledger and payment reconciliation service.
//!
//! Tracks what each student owes per fee structure and term, ingests
//! payments from manual entry and the bank deposit webhook, carries
//! overpayment forward as credit into later terms, and holds deposits it
//! cannot place for manual review instead of guessing.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
