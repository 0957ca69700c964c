//! Chat models.
//!
//! Contains the `/api/chat` request/response bodies and the raw query
//! result handed from the database to the formatter.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// Request body for asking a question.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct QuestionRequest {
    /// The question to ask, in plain language.
    #[validate(
        length(min = 1, message = "Question is required"),
        custom(function = "validate_not_blank")
    )]
    pub question: String,
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Question must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Response body carrying the final prose answer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub answer: String,
}

/// Result of one executed statement, shaped by what it returned.
///
/// A single cell becomes [`RawResult::Scalar`], single-column rows become
/// [`RawResult::Column`], anything else stays [`RawResult::Rows`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawResult {
    Scalar(Value),
    Column(Vec<Value>),
    Rows(Vec<Vec<Value>>),
}

impl RawResult {
    pub fn from_rows(mut rows: Vec<Vec<Value>>) -> Self {
        if rows.len() == 1 && rows[0].len() == 1 {
            let value = rows.remove(0).remove(0);
            return RawResult::Scalar(value);
        }
        if !rows.is_empty() && rows.iter().all(|row| row.len() == 1) {
            return RawResult::Column(rows.into_iter().flatten().collect());
        }
        RawResult::Rows(rows)
    }
}

/// Renders the result as compact text for the formatter prompt, e.g.
/// `[(668226.64, 'Jul 31, 2022'), (665818.4, 'Jun 30, 2022')]`.
impl fmt::Display for RawResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawResult::Scalar(value) => write_cell(f, value),
            RawResult::Column(values) => {
                f.write_str("[")?;
                write_joined(f, values)?;
                f.write_str("]")
            }
            RawResult::Rows(rows) => {
                f.write_str("[")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str("(")?;
                    write_joined(f, row)?;
                    f.write_str(")")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_cell(f, value)?;
    }
    Ok(())
}

fn write_cell(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("NULL"),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        other => write!(f, "{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_cell_is_scalar() {
        let result = RawResult::from_rows(vec![vec![json!(668226.64)]]);
        assert_eq!(result, RawResult::Scalar(json!(668226.64)));
        assert_eq!(result.to_string(), "668226.64");
    }

    #[test]
    fn test_single_column_is_flattened() {
        let result = RawResult::from_rows(vec![vec![json!("Alexandria")], vec![json!("Arlington")]]);
        assert_eq!(result.to_string(), "['Alexandria', 'Arlington']");
    }

    #[test]
    fn test_rows_render_as_tuples() {
        let result = RawResult::from_rows(vec![
            vec![json!(668226.64), json!("Jul 31, 2022")],
            vec![json!(665818.4), Value::Null],
        ]);
        assert_eq!(
            result.to_string(),
            "[(668226.64, 'Jul 31, 2022'), (665818.4, NULL)]"
        );
    }

    #[test]
    fn test_empty_result() {
        let result = RawResult::from_rows(vec![]);
        assert_eq!(result, RawResult::Rows(vec![]));
        assert_eq!(result.to_string(), "[]");
    }

    #[test]
    fn test_blank_question_fails_validation() {
        let empty = QuestionRequest { question: String::new() };
        let blank = QuestionRequest { question: "   ".into() };
        let fine = QuestionRequest { question: "highest price in Alexandria?".into() };
        assert!(empty.validate().is_err());
        assert!(blank.validate().is_err());
        assert!(fine.validate().is_ok());
    }
}
