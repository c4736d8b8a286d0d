use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::providers::openai::TokenUsage;
use crate::server::AppState;
use crate::server::payload::Dialect;
use crate::server::request_logging::{finish, record_success, track};

use super::inbound::{Inbound, StreamPolicy, prepare};

pub async fn chat_completions(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = chat_completions_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "chat", result)
}

async fn chat_completions_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    let Inbound {
        opts,
        body,
        uploaded,
    } = prepare(app_state, req, Dialect::ChatCompletions, StreamPolicy::Reject).await?;

    let request = Value::Object(body);
    let diag = &app_state.diagnostics;
    let response = track(
        diag,
        app_state.upstream.create_chat_completion(&opts, request.clone()),
    )
    .await?;
    record_success(
        diag,
        "chat",
        &request,
        &response,
        TokenUsage::from_chat_completion(&response),
    );

    Ok(match uploaded {
        Some(files) => Json(json!({ "response": response, "uploaded_files": files })).into_response(),
        None => Json(response).into_response(),
    })
}
