use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::providers::openai::TokenUsage;
use crate::server::AppState;
use crate::server::body::read_json;
use crate::server::payload::{ControlFields, Dialect, split_control_fields};
use crate::server::request_logging::{finish, record_success, track};
use crate::server::streaming::{StreamContext, relay_response_events};
use crate::server::util::is_valid_id;

use super::inbound::{Inbound, StreamPolicy, prepare};

/// input_items 透传给上游的分页参数
const INPUT_ITEM_PARAMS: [&str; 4] = ["limit", "order", "after", "before"];

pub async fn create_response(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = create_response_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "responses", result)
}

async fn create_response_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    let inbound = prepare(app_state, req, Dialect::Responses, StreamPolicy::Allow).await?;
    let stream = inbound.stream();
    let Inbound {
        opts,
        body,
        uploaded,
    } = inbound;
    let request = Value::Object(body);
    let diag = &app_state.diagnostics;

    if stream {
        let in_flight = diag.metrics.enter();
        let started = Instant::now();
        let events = match app_state.upstream.stream_response(&opts, request.clone()).await {
            Ok(events) => events,
            Err(e) => {
                diag.metrics.record_request(started.elapsed());
                return Err(e);
            }
        };
        let ctx = StreamContext {
            diagnostics: diag.clone(),
            label: "responses/stream",
            request,
            started,
            in_flight,
        };
        return Ok(relay_response_events(ctx, events));
    }

    let response = track(diag, app_state.upstream.create_response(&opts, request.clone())).await?;
    record_success(
        diag,
        "responses",
        &request,
        &response,
        TokenUsage::from_response(&response),
    );
    Ok(match uploaded {
        Some(files) => Json(json!({ "response": response, "uploaded_files": files })).into_response(),
        None => Json(response).into_response(),
    })
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Retrieve,
    Cancel,
    Delete,
    InputItems,
}

impl Lifecycle {
    fn label(self) -> &'static str {
        match self {
            Lifecycle::Retrieve => "responses/retrieve",
            Lifecycle::Cancel => "responses/cancel",
            Lifecycle::Delete => "responses/delete",
            Lifecycle::InputItems => "responses/input_items",
        }
    }
}

fn control_from_query(query: &HashMap<String, String>) -> ControlFields {
    let text = |key: &str| {
        query
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    ControlFields {
        security_key: text("security_key"),
        openai_api_key: text("openai_api_key"),
        organization: text("organization"),
        project: text("project"),
        timeout_ms: text("timeout_ms").map(Value::String),
        ..Default::default()
    }
}

// input_items 只透传分页参数，其余 query（含密钥）一律不转发
fn paging_params(query: &HashMap<String, String>) -> Vec<(String, String)> {
    INPUT_ITEM_PARAMS
        .iter()
        .filter_map(|key| {
            query
                .get(*key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), v.clone()))
        })
        .collect()
}

/// 生命周期操作：先鉴权，再校验 id，最后才调上游
async fn lifecycle_inner(
    app_state: &AppState,
    op: Lifecycle,
    id: &str,
    control: ControlFields,
    query: &HashMap<String, String>,
) -> Result<Response, GatewayError> {
    app_state.guard.require(control.security_key.as_deref())?;
    if !is_valid_id(id) {
        return Err(GatewayError::bad_request("missing or invalid response id"));
    }
    let opts = control.call_options(&app_state.config.upstream)?;

    let upstream = app_state.upstream.as_ref();
    let diag = &app_state.diagnostics;
    let response = match op {
        Lifecycle::Retrieve => track(diag, upstream.retrieve_response(&opts, id)).await?,
        Lifecycle::Cancel => track(diag, upstream.cancel_response(&opts, id)).await?,
        Lifecycle::Delete => track(diag, upstream.delete_response(&opts, id)).await?,
        Lifecycle::InputItems => {
            let forwarded = paging_params(query);
            track(diag, upstream.list_input_items(&opts, id, &forwarded)).await?
        }
    };
    record_success(diag, op.label(), &json!({ "id": id }), &response, None);
    Ok(Json(response).into_response())
}

async fn run_lifecycle(
    app_state: &AppState,
    op: Lifecycle,
    id: &str,
    control: ControlFields,
    query: &HashMap<String, String>,
) -> Response {
    let result = lifecycle_inner(app_state, op, id, control, query).await;
    finish(&app_state.diagnostics, op.label(), result)
}

pub async fn retrieve_response(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let control = control_from_query(&query);
    run_lifecycle(&app_state, Lifecycle::Retrieve, &id, control, &query).await
}

pub async fn delete_response(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let control = control_from_query(&query);
    run_lifecycle(&app_state, Lifecycle::Delete, &id, control, &query).await
}

/// 取消后台 response：密钥放在 JSON body 里，body 为空时退回 query
pub async fn cancel_response(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    let map = match read_json(req.into_body(), app_state.body_limit()).await {
        Ok(map) => map,
        Err(e) => return finish(&app_state.diagnostics, Lifecycle::Cancel.label(), Err(e)),
    };
    let mut control = split_control_fields(map).control;
    control.fill_missing_from(control_from_query(&query));
    run_lifecycle(&app_state, Lifecycle::Cancel, &id, control, &query).await
}

pub async fn list_input_items(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let control = control_from_query(&query);
    run_lifecycle(&app_state, Lifecycle::InputItems, &id, control, &query).await
}
