pub mod body;
pub mod handlers;
pub mod payload;
pub(crate) mod request_logging;
pub(crate) mod streaming;
pub mod temp_files;
pub mod throttle;
pub mod uploads;
pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::logging::Diagnostics;
use crate::providers::{OpenAIUpstream, Upstream};
use crate::server::handlers::auth::AccessGuard;
use crate::server::temp_files::TempStore;
use crate::server::throttle::Cooldown;

pub struct AppState {
    pub config: Settings,
    pub upstream: Arc<dyn Upstream>,
    pub diagnostics: Arc<Diagnostics>,
    pub guard: AccessGuard,
    pub temp: TempStore,
    pub probe_cooldown: Cooldown,
    pub diagnostics_cooldown: Cooldown,
}

impl AppState {
    pub fn new(config: Settings, upstream: Arc<dyn Upstream>) -> Self {
        let diagnostics = Arc::new(Diagnostics::new(&config.diagnostics));
        let cooldown = Duration::from_secs(config.diagnostics.cooldown_secs);
        Self {
            guard: AccessGuard::new(&config.security),
            temp: TempStore::new(config.uploads.temp_dir.clone(), diagnostics.clone()),
            probe_cooldown: Cooldown::new(cooldown),
            diagnostics_cooldown: Cooldown::new(cooldown),
            diagnostics,
            upstream,
            config,
        }
    }

    pub fn body_limit(&self) -> usize {
        self.config.server.max_body_bytes
    }
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    if config.security.security_key.is_none() {
        tracing::warn!("SECURITY_KEY 未设置：所有受保护接口都会返回 403");
    }
    if config.security.log_access_token.is_none() {
        tracing::warn!("LOG_ACCESS_TOKEN 未设置：诊断页不可访问");
    }
    if config.upstream.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY 未设置：只有携带 openai_api_key 的请求能调用上游");
    }

    let upstream = Arc::new(OpenAIUpstream::new(&config.upstream)?);
    let state = Arc::new(AppState::new(config, upstream));
    tracing::info!(
        base_url = %state.config.upstream.base_url,
        temp_dir = %state.temp.dir().display(),
        "upstream configured"
    );
    Ok(build_router(state))
}

// OPTIONS 在任何业务逻辑之前直接 200 + 空 body（CORS 头由外层 CorsLayer 补上）
async fn short_circuit_options(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return (StatusCode::OK, Body::empty()).into_response();
    }
    next.run(req).await
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let body_limit = state.body_limit();

    handlers::routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(short_circuit_options))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{MockUpstream, test_state};
    use tower::ServiceExt;

    #[tokio::test]
    async fn options_short_circuits_with_cors_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let app = build_router(test_state(tmp.path(), mock.clone()));

        for uri in ["/chat", "/does-not-exist", "/responses/resp_1"] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(uri)
                        .header("origin", "http://example.com")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(resp.headers().contains_key("access-control-allow-origin"));
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.is_empty());
        }
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn slow_upstream_hits_request_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::slow(Duration::from_secs(5)));
        let mut settings = crate::server::test_support::test_settings(tmp.path());
        settings.server.request_timeout_secs = 1;
        let app = build_router(Arc::new(AppState::new(settings, mock.clone())));

        let resp = app
            .oneshot(crate::server::test_support::json_request(
                "POST",
                "/chat",
                serde_json::json!({"security_key": crate::server::test_support::SECRET, "messages": []}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(mock.calls_to("chat"), 1);
    }

    #[tokio::test]
    async fn unknown_paths_and_methods_are_404_with_cors() {
        let tmp = tempfile::tempdir().unwrap();
        let app = build_router(test_state(tmp.path(), Arc::new(MockUpstream::default())));

        for (method, uri) in [(Method::GET, "/nope"), (Method::PUT, "/chat"), (Method::GET, "/files")] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header("origin", "http://example.com")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
            assert!(resp.headers().contains_key("access-control-allow-origin"));
        }
    }
}
