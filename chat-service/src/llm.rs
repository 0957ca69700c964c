//! 大模型客户端
//!
//! 对接 OpenAI 兼容的 chat-completions 接口。翻译、润色、致歉三类调用
//! 都通过 [`LanguageModel`] 完成，测试中以脚本化实现替换。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::config::OpenAiSettings;
use common::errors::{AppError, AppResult};

/// 文本进、文本出的大模型服务
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 发送一条提示词，返回模型回复的文本。
    ///
    /// `stop` 中的任一序列出现时模型停止生成。
    async fn complete(&self, prompt: &str, stop: &[&str]) -> AppResult<String>;
}

/// OpenAI chat-completions 客户端
pub struct OpenAiClient {
    http_client: reqwest::Client,
    settings: OpenAiSettings,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [&'a str]>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// 创建客户端，请求超时取自配置
    pub fn new(settings: OpenAiSettings) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str, stop: &[&str]) -> AppResult<String> {
        let request = ChatCompletionRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            stop: (!stop.is_empty()).then_some(stop),
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::LanguageModel(format!("请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(200).collect();
            return Err(AppError::LanguageModel(format!("HTTP {}: {}", status, truncated)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::LanguageModel(format!("无效的响应: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AppError::LanguageModel("模型返回了空内容".into()));
        }

        tracing::debug!(model = %self.settings.model, chars = content.len(), "模型已回复");
        Ok(content)
    }
}
