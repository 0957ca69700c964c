//! Shared building blocks for the price chat service.
//!
//! - [`config`]: environment-sourced settings
//! - [`errors`]: the application error type and its HTTP mapping
//! - [`response`]: the JSON envelope used by error and health responses
//! - [`models`]: request/response and query result models
//! - [`utils`]: SQL text repair and the read-only guard

pub mod config;
pub mod errors;
pub mod models;
pub mod response;
pub mod utils;
