//! 问答服务模块
//!
//! 串起一次问答的完整流程：
//! 翻译执行 → 成功则润色；语句出错则修复后重跑一次；仍失败则致歉。

use std::fmt;
use std::sync::Arc;

use common::config::{AppConfig, ChatConfig};
use common::errors::AppResult;
use common::models::RawResult;
use common::utils::{extract_embedded_sql, SqlRepairer, SqlValidator};

use crate::database::{PgDatabase, SqlExecutor};
use crate::formatter::Formatter;
use crate::llm::{LanguageModel, OpenAiClient};
use crate::translator::{ExecutionOutcome, Translator};

/// 回答是如何得到的，只写日志，不返回给调用方
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// 生成的 SQL 直接执行成功
    Executed { sql: String },
    /// 原 SQL 格式有误，修复后执行成功
    Repaired { sql: String },
    /// 未能得到结果，已致歉
    Failed { error: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Executed { sql } => write!(f, "SQL: {}", sql),
            Diagnostic::Repaired { sql } => {
                write!(f, "repaired from malformed SQL. Cleaned SQL: {}", sql)
            }
            Diagnostic::Failed { error } => write!(f, "Error occurred: {}", error),
        }
    }
}

/// 进程级问答服务：启动时构建一次，之后只读共享
pub struct ChatBot {
    llm: Arc<dyn LanguageModel>,
    db: Arc<dyn SqlExecutor>,
    table_info: String,
    top_k: usize,
}

impl ChatBot {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        db: Arc<dyn SqlExecutor>,
        table_info: String,
        top_k: usize,
    ) -> Self {
        Self {
            llm,
            db,
            table_info,
            top_k,
        }
    }

    /// 连接数据库、校验连通性、加载表结构并创建模型客户端
    pub async fn initialize(app_config: &AppConfig, config: ChatConfig) -> AppResult<Self> {
        tracing::info!("初始化数据库连接...");
        let db = PgDatabase::connect(&config.database, app_config).await?;
        db.ping().await?;
        let table_info = db.table_info(config.sample_rows).await?;
        tracing::info!("数据库连接成功");

        let llm = OpenAiClient::new(config.openai)?;
        tracing::info!("问答服务初始化完成");

        Ok(Self::new(Arc::new(llm), Arc::new(db), table_info, config.top_k))
    }

    /// 回答一个问题。
    ///
    /// 除致歉本身失败外，所有失败都在内部消化为致歉回复。
    pub async fn answer(&self, question: &str) -> AppResult<(String, Diagnostic)> {
        // 每个问题都使用全新的翻译器与润色器
        let translator = Translator::new(
            self.llm.as_ref(),
            self.db.as_ref(),
            &self.table_info,
            self.top_k,
        );
        let formatter = Formatter::new(self.llm.as_ref());

        let failure = match translator.run(question).await {
            ExecutionOutcome::Success { sql, result } => {
                match formatter.format(question, &result).await {
                    Ok(answer) => return Ok((answer, Diagnostic::Executed { sql })),
                    Err(e) => e.to_string(),
                }
            }
            ExecutionOutcome::RepairableFailure { sql, error } => {
                match self.retry_repaired(question, &sql, &formatter).await {
                    Some(answered) => return Ok(answered),
                    None => error,
                }
            }
            ExecutionOutcome::UnrecoverableFailure(error) => match extract_embedded_sql(&error) {
                Some(sql) => match self.retry_repaired(question, &sql, &formatter).await {
                    Some(answered) => return Ok(answered),
                    None => error,
                },
                None => error,
            },
        };

        tracing::warn!(error = %failure, "无法回答问题，生成致歉回复");
        let apology = formatter.apologize(question).await?;
        Ok((apology, Diagnostic::Failed { error: failure }))
    }

    /// 修复 SQL 并直接重跑一次
    async fn retry_repaired(
        &self,
        question: &str,
        sql: &str,
        formatter: &Formatter<'_>,
    ) -> Option<(String, Diagnostic)> {
        let cleaned = SqlRepairer::repair(sql);
        tracing::info!(sql = %cleaned, "尝试执行修复后的 SQL");

        if let Err(e) = SqlValidator::validate_query(&cleaned) {
            tracing::warn!(error = %e, "修复后的 SQL 未通过校验");
            return None;
        }

        let result: RawResult = match self.db.run(&cleaned).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "修复后的 SQL 执行失败");
                return None;
            }
        };
        tracing::debug!(result = %result, "修复后的 SQL 执行成功");

        match formatter.format(question, &result).await {
            Ok(answer) => Some((answer, Diagnostic::Repaired { sql: cleaned })),
            Err(e) => {
                tracing::warn!(error = %e, "结果润色失败");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ExecutionError;
    use crate::testing::{fence_error, ScriptedDatabase, ScriptedModel};
    use common::errors::AppError;
    use serde_json::json;

    fn chatbot(llm: &Arc<ScriptedModel>, db: &Arc<ScriptedDatabase>) -> ChatBot {
        ChatBot::new(llm.clone(), db.clone(), "CREATE TABLE \"prices\" (...)".into(), 5)
    }

    #[tokio::test]
    async fn test_success_path_formats_result() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Ok("SELECT MAX(\"value\") FROM prices WHERE city = 'Alexandria'".into()),
            Ok("The highest price in Alexandria in 2022 was $668,226.64.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![Ok(RawResult::Scalar(json!(668226.64)))]));

        let (answer, diagnostic) = chatbot(&llm, &db)
            .answer("highest price in alexandria in 2022?")
            .await
            .unwrap();

        assert!(answer.contains("$668,226.64"));
        assert_eq!(
            diagnostic,
            Diagnostic::Executed {
                sql: "SELECT MAX(\"value\") FROM prices WHERE city = 'Alexandria'".into()
            }
        );
        assert_eq!(llm.prompts().len(), 2);
        assert_eq!(db.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_fenced_sql_is_repaired_and_retried() {
        let fenced = "```sql\nSELECT \"value\" FROM prices ORDER BY \"value\" DESC LIMIT 5\n```";
        let llm = Arc::new(ScriptedModel::new(vec![
            Ok(fenced.into()),
            Ok("1. $668,226.64\n2. $665,818.40".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![
            Err(fence_error(fenced)),
            Ok(RawResult::Column(vec![json!(668226.64), json!(665818.40)])),
        ]));

        let (answer, diagnostic) = chatbot(&llm, &db).answer("top prices?").await.unwrap();

        let repaired = r#"SELECT "value" FROM prices WHERE "value" IS NOT NULL ORDER BY "value" DESC LIMIT 5"#;
        assert!(answer.contains("$668,226.64"));
        assert_eq!(diagnostic, Diagnostic::Repaired { sql: repaired.into() });
        assert!(diagnostic.to_string().starts_with("repaired from malformed SQL"));
        assert_eq!(db.executed(), vec![fenced.to_string(), repaired.to_string()]);
    }

    #[tokio::test]
    async fn test_double_failure_apologizes() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Ok("SELECT price FROM listings".into()),
            Ok("Sorry, we couldn't find that data for the DMV area.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![
            Err(ExecutionError::Statement {
                sql: "SELECT price FROM listings".into(),
                message: "relation \"listings\" does not exist".into(),
            }),
            Err(ExecutionError::Statement {
                sql: r#"SELECT price FROM listings WHERE "value" IS NOT NULL"#.into(),
                message: "relation \"listings\" does not exist".into(),
            }),
        ]));

        let (answer, diagnostic) = chatbot(&llm, &db).answer("listing prices?").await.unwrap();

        assert!(answer.starts_with("Sorry"));
        match diagnostic {
            Diagnostic::Failed { error } => assert!(error.contains("does not exist")),
            other => panic!("unexpected diagnostic: {:?}", other),
        }
        assert_eq!(db.executed().len(), 2);
        assert!(llm.prompts()[1].contains("The database query failed."));
    }

    #[tokio::test]
    async fn test_model_outage_apologizes_without_touching_database() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Err(AppError::LanguageModel("HTTP 503".into())),
            Ok("Sorry, please try again later.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![]));

        let (answer, diagnostic) = chatbot(&llm, &db).answer("q?").await.unwrap();

        assert_eq!(answer, "Sorry, please try again later.");
        assert!(matches!(diagnostic, Diagnostic::Failed { .. }));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_embedded_sql_in_error_text_is_recovered() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Err(AppError::LanguageModel(
                "bad output\n[SQL: ```sql\nSELECT COUNT(*) FROM prices\n```]".into(),
            )),
            Ok("There are 42 price records.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![Ok(RawResult::Scalar(json!(42)))]));

        let (_, diagnostic) = chatbot(&llm, &db).answer("how many?").await.unwrap();

        assert_eq!(
            diagnostic,
            Diagnostic::Repaired {
                sql: r#"SELECT COUNT(*) FROM prices WHERE "value" IS NOT NULL"#.into()
            }
        );
    }

    #[tokio::test]
    async fn test_format_failure_apologizes() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Ok("SELECT 1".into()),
            Err(AppError::LanguageModel("timeout".into())),
            Ok("Sorry, something went wrong.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![Ok(RawResult::Scalar(json!(1)))]));

        let (answer, diagnostic) = chatbot(&llm, &db).answer("q?").await.unwrap();

        assert_eq!(answer, "Sorry, something went wrong.");
        assert!(matches!(diagnostic, Diagnostic::Failed { .. }));
    }

    #[tokio::test]
    async fn test_apology_failure_escapes() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Err(AppError::LanguageModel("down".into())),
            Err(AppError::LanguageModel("still down".into())),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![]));

        let err = chatbot(&llm, &db).answer("q?").await.unwrap_err();

        assert!(matches!(err, AppError::LanguageModel(_)));
    }

    #[tokio::test]
    async fn test_questions_share_no_context() {
        let llm = Arc::new(ScriptedModel::new(vec![
            Ok("SELECT 1".into()),
            Ok("One.".into()),
            Ok("SELECT 2".into()),
            Ok("Two.".into()),
        ]));
        let db = Arc::new(ScriptedDatabase::new(vec![
            Ok(RawResult::Scalar(json!(1))),
            Ok(RawResult::Scalar(json!(2))),
        ]));
        let bot = chatbot(&llm, &db);

        bot.answer("first question about Arlington").await.unwrap();
        bot.answer("second question").await.unwrap();

        let prompts = llm.prompts();
        assert!(!prompts[2].contains("Arlington"));
        assert!(!prompts[3].contains("Arlington"));
    }
}
