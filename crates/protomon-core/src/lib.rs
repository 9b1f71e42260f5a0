//! protomon-core: protocol-agnostic health policy for field data sources.
//!
//! Pure functions and plain data only. Concurrency, clocks and logging live
//! in `protomon-registry`.

pub mod classify;
pub mod config;
pub mod error;
pub mod health;
pub mod types;
