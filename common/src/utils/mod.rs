//! SQL text helpers.

pub mod sql_repair;
pub mod sql_validator;

pub use sql_repair::{extract_embedded_sql, SqlRepairer};
pub use sql_validator::SqlValidator;
