use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Response};
use chrono::Utc;

use crate::error::GatewayError;
use crate::logging::report::render_report;
use crate::server::AppState;

#[derive(Debug, Clone, Copy)]
enum View {
    Info,
    Errors,
}

/// 顺序：令牌 → 冷却 → 先取快照再记访问时间，页面显示的是上一次访问
fn render_view(
    app_state: &AppState,
    view: View,
    query: &HashMap<String, String>,
) -> Result<Response, GatewayError> {
    app_state
        .guard
        .require_diagnostics(query.get("access_token").map(String::as_str))?;
    if !app_state.diagnostics_cooldown.try_acquire() {
        return Err(GatewayError::RateLimited);
    }

    let diag = &app_state.diagnostics;
    let snapshot = diag.metrics.snapshot();
    diag.metrics.mark_diagnostic_access(Utc::now());
    let (title, entries) = match view {
        View::Info => ("Log", diag.info.recent_first()),
        View::Errors => ("Error log", diag.errors.recent_first()),
    };
    Ok(Html(render_report(title, &snapshot, &entries)).into_response())
}

pub async fn info_log(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    render_view(&app_state, View::Info, &query).unwrap_or_else(IntoResponse::into_response)
}

pub async fn error_log(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    render_view(&app_state, View::Errors, &query).unwrap_or_else(IntoResponse::into_response)
}
