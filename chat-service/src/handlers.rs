//! Handler模块

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::models::{ChatResponse, QuestionRequest};
use common::response::ApiResponse;

use crate::state::AppState;

/// 提问
///
/// 服务未就绪时，任何请求都返回 503。
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = QuestionRequest,
    responses(
        (status = 200, description = "回答成功（含致歉回复）", body = ChatResponse),
        (status = 400, description = "请求体无效或问题为空"),
        (status = 500, description = "处理失败"),
        (status = 503, description = "服务初始化失败")
    )
)]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let bot = state.chatbot()?;
    let Json(req) = payload?;
    req.validate()?;

    info!(question = %req.question, "收到问题");
    let (answer, diagnostic) = bot.answer(&req.question).await?;
    info!(diagnostic = %diagnostic, "问题处理完成");

    Ok(Json(ChatResponse { answer }))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = ApiResponse<HealthResponse>)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let ready = state.is_ready();
    let health = HealthResponse {
        status: if ready { "healthy" } else { "degraded" }.to_string(),
        service: state.config.service_name.clone(),
        ready,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };
    Json(ApiResponse::ok_with_service(health, state.config.service_name.clone()))
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    /// 问答流程是否初始化成功
    pub ready: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
