//! Coursepay - payment lifecycle and reconciliation service for online courses
//!
//! This library provides the core functionality for processing course purchases
//! against the T-Bank acquiring API: request signing, the purchase state machine,
//! the idempotent settlement protocol, and the lock-token reconciliation loop.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod grants;
pub mod handlers;
pub mod id;
pub mod models;
pub mod payments;
pub mod reconcile;
pub mod settlement;
