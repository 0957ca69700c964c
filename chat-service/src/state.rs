//! Application state for chat service.

use std::sync::Arc;

use common::config::{AppConfig, ChatConfig};
use common::errors::{AppError, AppResult};

use crate::service::ChatBot;

/// Whether the service managed to start its question pipeline.
#[derive(Clone)]
pub enum Readiness {
    Ready(Arc<ChatBot>),
    /// Initialization failed; every question is refused with this reason.
    Unavailable(String),
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub readiness: Readiness,
}

impl AppState {
    /// Builds the chat pipeline once. A failure does not stop the process;
    /// it is recorded and reported on every request instead.
    pub async fn initialize(config: AppConfig) -> Self {
        let readiness = match ChatConfig::from_env() {
            Err(e) => {
                tracing::error!(error = %e, "配置缺失，服务不可用");
                Readiness::Unavailable(e.to_string())
            }
            Ok(chat_config) => match ChatBot::initialize(&config, chat_config).await {
                Ok(bot) => Readiness::Ready(Arc::new(bot)),
                Err(e) => {
                    tracing::error!(error = %e, "初始化失败，服务不可用");
                    Readiness::Unavailable(format!("Failed during initialization: {}", e))
                }
            },
        };
        Self { config, readiness }
    }

    #[cfg(test)]
    pub fn ready(config: AppConfig, bot: ChatBot) -> Self {
        Self {
            config,
            readiness: Readiness::Ready(Arc::new(bot)),
        }
    }

    #[cfg(test)]
    pub fn unavailable(config: AppConfig, reason: impl Into<String>) -> Self {
        Self {
            config,
            readiness: Readiness::Unavailable(reason.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.readiness, Readiness::Ready(_))
    }

    /// The chat pipeline, or `ServiceUnavailable` carrying the init failure.
    pub fn chatbot(&self) -> AppResult<&ChatBot> {
        match &self.readiness {
            Readiness::Ready(bot) => Ok(bot.as_ref()),
            Readiness::Unavailable(reason) => Err(AppError::ServiceUnavailable(reason.clone())),
        }
    }
}
