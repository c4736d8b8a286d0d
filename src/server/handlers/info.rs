use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::payload::ControlFields;
use crate::server::request_logging::{finish, track};

pub async fn greeting() -> Html<&'static str> {
    Html("<h1>Hello, World!</h1><p>llm-relay</p>")
}

#[derive(Debug, Clone, Copy)]
enum Probe {
    ListModels,
    DefaultModel,
}

// 探测只用配置里的凭据；和诊断页不共用冷却窗口
async fn probe_inner(app_state: &AppState, probe: Probe) -> Result<Response, GatewayError> {
    if !app_state.probe_cooldown.try_acquire() {
        return Err(GatewayError::RateLimited);
    }
    let opts = ControlFields::default().call_options(&app_state.config.upstream)?;
    let diag = &app_state.diagnostics;
    let upstream = app_state.upstream.as_ref();
    let body = match probe {
        Probe::ListModels => {
            let models = track(diag, upstream.list_models(&opts)).await?;
            let count = models
                .get("data")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            json!({ "status": "ok", "models": count })
        }
        Probe::DefaultModel => {
            let model = &app_state.config.defaults.model;
            let info = track(diag, upstream.retrieve_model(&opts, model)).await?;
            json!({
                "status": "ok",
                "model": info.get("id").cloned().unwrap_or_else(|| json!(model)),
            })
        }
    };
    Ok(Json(body).into_response())
}

pub async fn health(State(app_state): State<Arc<AppState>>) -> Response {
    let result = probe_inner(&app_state, Probe::ListModels).await;
    finish(&app_state.diagnostics, "health", result)
}

pub async fn health_model(State(app_state): State<Arc<AppState>>) -> Response {
    let result = probe_inner(&app_state, Probe::DefaultModel).await;
    finish(&app_state.diagnostics, "health2", result)
}

#[cfg(test)]
mod tests {
    use super::super::routes;
    use crate::server::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn greeting_needs_no_auth() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let app = routes().with_state(test_state(tmp.path(), mock.clone()));

        let resp = app.oneshot(empty_request("GET", "/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Hello, World!"));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn probes_share_one_cooldown() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let app = routes().with_state(test_state(tmp.path(), mock.clone()));

        let resp = app.clone().oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"status": "ok", "models": 2}));

        for uri in ["/health", "/health2"] {
            let resp = app.clone().oneshot(empty_request("GET", uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        }
        assert_eq!(mock.total_calls(), 1);
    }

    #[tokio::test]
    async fn default_model_probe_and_window_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let mut settings = test_settings(tmp.path());
        settings.diagnostics.cooldown_secs = 0;
        let app = routes().with_state(Arc::new(crate::server::AppState::new(settings, mock.clone())));

        let resp = app.clone().oneshot(empty_request("GET", "/health2")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["model"], "gpt-4.1-mini");

        let resp = app.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(mock.calls_to("retrieve_model"), 1);
        assert_eq!(mock.calls_to("list_models"), 1);
        let opts = mock.last_options().unwrap();
        assert_eq!(opts.api_key.as_deref(), Some("sk-default-key-0000"));
    }

    #[tokio::test]
    async fn upstream_failure_is_relayed_and_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::failing(
            503,
            json!({"error": {"message": "overloaded"}}),
        ));
        let state = test_state(tmp.path(), mock.clone());
        let app = routes().with_state(state.clone());

        let resp = app.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.diagnostics.metrics.snapshot().error_count, 1);
        assert_eq!(state.diagnostics.errors.len(), 1);
    }
}
