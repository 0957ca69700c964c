//! SQL statement validator.
//!
//! Model-generated SQL is executed with the service's database role, so
//! anything that could modify data or schema is refused before it runs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::AppError;

/// Validates SQL statements for security.
pub struct SqlValidator;

static FORBIDDEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(DROP|TRUNCATE|ALTER|GRANT|REVOKE|CREATE|INSERT\s+INTO|UPDATE|DELETE\s+FROM|COPY)\b",
    )
    .expect("forbidden keyword pattern is valid")
});

impl SqlValidator {
    /// Validates a SQL statement for forbidden operations.
    ///
    /// Markdown fences around the statement are irrelevant here, so this can
    /// run on raw model output as well as on repaired SQL.
    ///
    /// # Errors
    /// Returns `AppError::UnsafeSql` naming the first forbidden keyword.
    pub fn validate(sql: &str) -> Result<(), AppError> {
        if let Some(found) = FORBIDDEN_RE.find(sql) {
            let keyword = found
                .as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_uppercase();
            return Err(AppError::UnsafeSql(format!("forbidden operation: {}", keyword)));
        }
        Ok(())
    }

    /// Checks if the SQL is a query (`SELECT`, or a `WITH` leading into one).
    pub fn is_select(sql: &str) -> bool {
        let upper = sql.trim_start().to_uppercase();
        upper.starts_with("SELECT") || upper.starts_with("WITH")
    }

    /// Full check for SQL that is about to run directly: read-only and a query.
    pub fn validate_query(sql: &str) -> Result<(), AppError> {
        Self::validate(sql)?;
        if !Self::is_select(sql) {
            return Err(AppError::UnsafeSql("only SELECT statements may run".into()));
        }
        Ok(())
    }
}
