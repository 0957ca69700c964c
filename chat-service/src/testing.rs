//! Scripted stand-ins for the language model and the database.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use common::errors::{AppError, AppResult};
use common::models::RawResult;

use crate::database::{ExecutionError, SqlExecutor};
use crate::llm::LanguageModel;

/// Answers prompts from a fixed script and records what it was asked.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<AppResult<String>>>,
    prompts: Mutex<Vec<String>>,
    stops: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<AppResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<Vec<String>> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, stop: &[&str]) -> AppResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.stops
            .lock()
            .unwrap()
            .push(stop.iter().map(|s| s.to_string()).collect());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LanguageModel("script exhausted".into())))
    }
}

/// Returns scripted results and records every statement it ran.
pub struct ScriptedDatabase {
    results: Mutex<VecDeque<Result<RawResult, ExecutionError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedDatabase {
    pub fn new(results: Vec<Result<RawResult, ExecutionError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedDatabase {
    async fn run(&self, sql: &str) -> Result<RawResult, ExecutionError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExecutionError::Driver("script exhausted".into())))
    }
}

/// Statement error the way Postgres reports fenced SQL.
pub fn fence_error(sql: &str) -> ExecutionError {
    ExecutionError::Statement {
        sql: sql.to_string(),
        message: "syntax error at or near \"`\"".to_string(),
    }
}
