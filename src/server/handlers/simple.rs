use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::providers::openai::TokenUsage;
use crate::server::AppState;
use crate::server::body::read_json;
use crate::server::payload::split_control_fields;
use crate::server::request_logging::{finish, record_success, track};

const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;
const TOP_P_RANGE: std::ops::RangeInclusive<f32> = 0.0..=1.0;

/// 单 prompt 的简化请求；安全相关字段已在外层拆掉
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SimplePromptRequest {
    prompt: String,
    /// system 消息
    role: Option<String>,
    model: Option<String>,
    /// 指定后要求模型只输出符合该 schema 的 JSON，覆盖 role
    schema: Option<Value>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
}

fn schema_instruction(schema: &Value) -> String {
    let schema = match schema {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!(
        "You are a machine that only returns and replies with valid, iterable RFC8259 compliant JSON in your responses according to the schema: {}.",
        schema
    )
}

fn check_range(name: &str, value: f32, range: &std::ops::RangeInclusive<f32>) -> Result<(), GatewayError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(GatewayError::bad_request(format!(
            "{} must be between {} and {}",
            name,
            range.start(),
            range.end()
        )))
    }
}

fn builder_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::bad_request(e.to_string())
}

pub async fn simple_prompt(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = simple_prompt_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "chat/simple", result)
}

async fn simple_prompt_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    let map = read_json(req.into_body(), app_state.body_limit()).await?;
    let shaped = split_control_fields(map);
    app_state.guard.require(shaped.control.security_key.as_deref())?;
    shaped.control.reject_attachments()?;

    let input: SimplePromptRequest = serde_json::from_value(Value::Object(shaped.body))
        .map_err(|e| GatewayError::bad_request(e.to_string()))?;
    if input.prompt.trim().is_empty() {
        return Err(GatewayError::bad_request("prompt must not be empty"));
    }
    let defaults = &app_state.config.defaults;
    let temperature = input.temperature.unwrap_or(defaults.temperature);
    let top_p = input.top_p.unwrap_or(defaults.top_p);
    check_range("temperature", temperature, &TEMPERATURE_RANGE)?;
    check_range("top_p", top_p, &TOP_P_RANGE)?;

    let system = match (&input.schema, &input.role) {
        (Some(schema), _) => Some(schema_instruction(schema)),
        (None, Some(role)) if !role.trim().is_empty() => Some(role.clone()),
        _ => None,
    };
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(builder_error)?
                .into(),
        );
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(input.prompt)
            .build()
            .map_err(builder_error)?
            .into(),
    );

    let model = input
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| defaults.model.clone());
    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model)
        .messages(messages)
        .temperature(temperature)
        .top_p(top_p);
    if let Some(max_tokens) = input.max_tokens {
        args.max_completion_tokens(max_tokens);
    }
    let request = serde_json::to_value(args.build().map_err(builder_error)?)?;

    let opts = shaped.control.call_options(&app_state.config.upstream)?;
    let diag = &app_state.diagnostics;
    let response = track(
        diag,
        app_state.upstream.create_chat_completion(&opts, request.clone()),
    )
    .await?;
    record_success(
        diag,
        "chat/simple",
        &request,
        &response,
        TokenUsage::from_chat_completion(&response),
    );
    Ok(Json(response).into_response())
}
