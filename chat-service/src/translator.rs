//! 问题翻译与执行
//!
//! 把问题交给大模型生成 SQL，然后原样执行。模型输出中的 markdown
//! 包裹不在这里处理：执行失败时由修复流程接手。

use common::models::RawResult;
use common::utils::SqlValidator;

use crate::database::{ExecutionError, SqlExecutor};
use crate::llm::LanguageModel;
use crate::prompts;

/// 一次翻译执行的结果
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// 执行成功
    Success { sql: String, result: RawResult },
    /// 数据库拒绝了该语句，可尝试修复后重跑
    RepairableFailure { sql: String, error: String },
    /// 无法修复的失败（模型不可用、语句被拒绝等）
    UnrecoverableFailure(String),
}

/// 单次请求内使用的翻译器，不跨请求复用
pub struct Translator<'a> {
    llm: &'a dyn LanguageModel,
    db: &'a dyn SqlExecutor,
    table_info: &'a str,
    top_k: usize,
}

impl<'a> Translator<'a> {
    pub fn new(
        llm: &'a dyn LanguageModel,
        db: &'a dyn SqlExecutor,
        table_info: &'a str,
        top_k: usize,
    ) -> Self {
        Self {
            llm,
            db,
            table_info,
            top_k,
        }
    }

    /// 生成 SQL 并执行
    pub async fn run(&self, question: &str) -> ExecutionOutcome {
        let prompt = prompts::translation(question, self.table_info, self.top_k);
        let completion = match self.llm.complete(&prompt, &[prompts::SQL_RESULT_STOP]).await {
            Ok(completion) => completion,
            Err(e) => return ExecutionOutcome::UnrecoverableFailure(e.to_string()),
        };

        let sql = extract_sql_query(&completion);
        if sql.is_empty() {
            return ExecutionOutcome::UnrecoverableFailure("模型没有生成 SQL".into());
        }
        if let Err(e) = SqlValidator::validate(&sql) {
            return ExecutionOutcome::UnrecoverableFailure(e.to_string());
        }

        tracing::debug!(sql = %sql, "执行生成的 SQL");
        match self.db.run(&sql).await {
            Ok(result) => ExecutionOutcome::Success { sql, result },
            Err(ExecutionError::Statement { sql, message }) => {
                let error = ExecutionError::Statement {
                    sql: sql.clone(),
                    message,
                }
                .to_string();
                ExecutionOutcome::RepairableFailure { sql, error }
            }
            Err(err) => ExecutionOutcome::UnrecoverableFailure(err.to_string()),
        }
    }
}

/// 从模型回复中取出 SQL：去掉 `SQLQuery:` 前缀，截断到
/// `SQLResult:` 或 `Answer:` 之前。
pub fn extract_sql_query(completion: &str) -> String {
    let text = completion.trim();
    let text = match text.find("SQLQuery:") {
        Some(start) => &text[start + "SQLQuery:".len()..],
        None => text,
    };
    let end = ["SQLResult:", "Answer:"]
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());
    text[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDatabase, ScriptedModel};
    use common::errors::AppError;
    use serde_json::json;

    #[test]
    fn test_extract_sql_query() {
        assert_eq!(extract_sql_query("SELECT 1"), "SELECT 1");
        assert_eq!(
            extract_sql_query("SQLQuery: SELECT COUNT(*) FROM prices\nSQLResult: [(3,)]"),
            "SELECT COUNT(*) FROM prices"
        );
        assert_eq!(extract_sql_query("SELECT 1\nAnswer: one"), "SELECT 1");
        assert_eq!(
            extract_sql_query("```sql\nSELECT 1\n```"),
            "```sql\nSELECT 1\n```"
        );
    }

    #[tokio::test]
    async fn test_success_outcome() {
        let llm = ScriptedModel::new(vec![Ok("SELECT MAX(\"value\") FROM prices".into())]);
        let db = ScriptedDatabase::new(vec![Ok(RawResult::Scalar(json!(668226.64)))]);
        let translator = Translator::new(&llm, &db, "CREATE TABLE prices (...)", 5);

        match translator.run("highest price?").await {
            ExecutionOutcome::Success { sql, result } => {
                assert_eq!(sql, "SELECT MAX(\"value\") FROM prices");
                assert_eq!(result, RawResult::Scalar(json!(668226.64)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(llm.stops(), vec![vec![prompts::SQL_RESULT_STOP.to_string()]]);
    }

    #[tokio::test]
    async fn test_statement_error_is_repairable() {
        let llm = ScriptedModel::new(vec![Ok("```sql\nSELECT 1\n```".into())]);
        let db = ScriptedDatabase::new(vec![Err(ExecutionError::Statement {
            sql: "```sql\nSELECT 1\n```".into(),
            message: "syntax error".into(),
        })]);
        let translator = Translator::new(&llm, &db, "", 5);

        match translator.run("q").await {
            ExecutionOutcome::RepairableFailure { sql, error } => {
                assert_eq!(sql, "```sql\nSELECT 1\n```");
                assert!(error.contains("[SQL:"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_is_unrecoverable() {
        let llm = ScriptedModel::new(vec![Err(AppError::LanguageModel("HTTP 500".into()))]);
        let db = ScriptedDatabase::new(vec![]);
        let translator = Translator::new(&llm, &db, "", 5);

        assert!(matches!(
            translator.run("q").await,
            ExecutionOutcome::UnrecoverableFailure(_)
        ));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_sql_never_runs() {
        let llm = ScriptedModel::new(vec![Ok("DROP TABLE prices".into())]);
        let db = ScriptedDatabase::new(vec![]);
        let translator = Translator::new(&llm, &db, "", 5);

        assert!(matches!(
            translator.run("q").await,
            ExecutionOutcome::UnrecoverableFailure(_)
        ));
        assert!(db.executed().is_empty());
    }
}
