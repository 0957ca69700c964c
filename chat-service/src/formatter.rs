//! 结果润色
//!
//! 把原始查询结果交给大模型转成自然语言；失败时生成致歉回复。

use common::errors::AppResult;
use common::models::RawResult;

use crate::llm::LanguageModel;
use crate::prompts;

/// 单次请求内使用的润色器
pub struct Formatter<'a> {
    llm: &'a dyn LanguageModel,
}

impl<'a> Formatter<'a> {
    pub fn new(llm: &'a dyn LanguageModel) -> Self {
        Self { llm }
    }

    /// 按固定风格（千分位、两位小数、美元单位、逐行编号）渲染结果
    pub async fn format(&self, question: &str, result: &RawResult) -> AppResult<String> {
        let prompt = prompts::formatting(question, &result.to_string());
        self.llm.complete(&prompt, &[]).await
    }

    /// 生成友好的致歉回复
    pub async fn apologize(&self, question: &str) -> AppResult<String> {
        let prompt = prompts::apology(question);
        self.llm.complete(&prompt, &[]).await
    }
}
