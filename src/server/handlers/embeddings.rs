use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::GatewayError;
use crate::providers::openai::TokenUsage;
use crate::server::AppState;
use crate::server::body::read_json;
use crate::server::payload::{ensure_model, split_control_fields};
use crate::server::request_logging::{finish, record_success, track};

// input 可以是字符串、字符串数组或 token 数组；其余交给上游判断
fn check_input(input: Option<&Value>) -> Result<(), GatewayError> {
    match input {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        Some(Value::Array(items)) if !items.is_empty() => Ok(()),
        _ => Err(GatewayError::bad_request("input must be a non-empty string or array")),
    }
}

pub async fn create_embedding(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = create_embedding_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "embeddings", result)
}

async fn create_embedding_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    let map = read_json(req.into_body(), app_state.body_limit()).await?;
    let shaped = split_control_fields(map);
    app_state.guard.require(shaped.control.security_key.as_deref())?;
    shaped.control.reject_attachments()?;

    let mut body = shaped.body;
    check_input(body.get("input"))?;
    ensure_model(&mut body, &app_state.config.defaults.embedding_model);
    let opts = shaped.control.call_options(&app_state.config.upstream)?;

    let request = Value::Object(body);
    let diag = &app_state.diagnostics;
    let response = track(diag, app_state.upstream.create_embedding(&opts, request.clone())).await?;
    record_success(
        diag,
        "embeddings",
        &request,
        &response,
        TokenUsage::from_embedding(&response),
    );
    Ok(Json(response).into_response())
}
