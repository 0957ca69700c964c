//! 房价智能问答服务
//!
//! 提供自然语言查询房价数据库的功能，包括：
//! - 问题翻译为 SQL 并执行
//! - 格式错误 SQL 的修复与重试
//! - 查询结果润色为自然语言回答

mod database;
mod formatter;
mod handlers;
mod llm;
mod prompts;
mod routes;
mod service;
mod state;
mod translator;

#[cfg(test)]
mod testing;

use std::any::Any;
use std::path::Path;

use anyhow::Context;
use axum::{
    http::{HeaderValue, Request},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use common::config::{load_dotenv, AppConfig};
use common::errors::AppError;
use state::AppState;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "chat-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "房价问答服务 API",
        version = "0.1.0",
        description = "自然语言查询房价数据库的问答微服务"
    ),
    paths(
        handlers::chat,
        handlers::health_check,
    ),
    components(schemas(
        common::models::QuestionRequest,
        common::models::ChatResponse,
        handlers::HealthResponse,
    )),
    tags(
        (name = "chat", description = "问答端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 配置
    load_dotenv(Path::new(".env"));

    init_tracing();

    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化失败不退出，由每个请求返回 503
    let state = AppState::initialize(config.clone()).await;

    let app = create_router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

/// 初始化日志追踪，`LOG_FORMAT=json` 时输出 JSON 行
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn create_router(state: AppState, config: &AppConfig) -> Router {
    let mut router = Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json));

    // 生产环境托管前端静态文件
    if let Some(dir) = &config.static_dir {
        let index = Path::new(dir).join("index.html");
        router = router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &Request<axum::body::Body>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    },
                ))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(CompressionLayer::new()),
        )
        .layer(cors_layer(&config.cors_allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(AnyOrigin).allow_headers(AnyOrigin);
    if origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(AnyOrigin);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    AppError::Internal(format!("handler panicked: {}", detail)).into_response()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "监听退出信号失败");
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
