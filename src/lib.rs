//! Stork Validator Library
//!
//! Polling validator for Stork signed price attestations: session upkeep,
//! proxy-aware concurrent dispatch and per-cycle stats reconciliation

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod oracle;
pub mod proxy;
pub mod scheduler;
pub mod stats;
pub mod types;
pub mod validator;
