use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::body::{is_multipart, read_multipart};
use crate::server::payload::{ControlFields, form_security_key};
use crate::server::request_logging::finish;
use crate::server::uploads::upload_parts;

pub async fn upload_files(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = upload_files_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "files", result)
}

async fn upload_files_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    if !is_multipart(req.headers()) {
        return Err(GatewayError::bad_request("expected multipart/form-data"));
    }
    let form = read_multipart(req).await?;
    app_state.guard.require(form_security_key(&form.fields).as_deref())?;
    if form.files.is_empty() {
        return Err(GatewayError::bad_request("no files in request"));
    }

    let control = ControlFields::from_form(&form.fields);
    let opts = control.call_options(&app_state.config.upstream)?;
    let purpose = form
        .fields
        .first_non_empty(&["purpose", "file_purpose"])
        .unwrap_or(app_state.config.defaults.file_purpose.as_str())
        .to_string();

    let uploaded = upload_parts(app_state, &opts, form.files, &purpose).await?;
    Ok(Json(json!({ "uploaded_files": uploaded })).into_response())
}
