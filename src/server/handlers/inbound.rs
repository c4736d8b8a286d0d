use axum::extract::Request;
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::providers::CallOptions;
use crate::server::AppState;
use crate::server::body::{is_multipart, read_json, read_multipart};
use crate::server::payload::{
    Attachment, ControlFields, Dialect, check_attachment_target, ensure_model,
    form_security_key, merge_attachments, payload_from_form, split_control_fields, wants_stream,
};
use crate::server::uploads::{UploadedFileInfo, upload_parts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StreamPolicy {
    Reject,
    Allow,
}

/// 鉴权、整形、上传都已完成、可以直接发给上游的请求
pub(super) struct Inbound {
    pub opts: CallOptions,
    pub body: Map<String, Value>,
    /// multipart 请求才有；响应要包成 {response, uploaded_files}
    pub uploaded: Option<Vec<UploadedFileInfo>>,
}

impl Inbound {
    pub fn stream(&self) -> bool {
        wants_stream(&self.body)
    }
}

/// chat / responses 共用的入口整形：JSON 或 multipart 二选一。
/// 顺序固定为 读取 → 鉴权 → 校验 → 上传 → 合并附件，鉴权之前不会碰上游和临时文件。
pub(super) async fn prepare(
    state: &AppState,
    req: Request,
    dialect: Dialect,
    policy: StreamPolicy,
) -> Result<Inbound, GatewayError> {
    if is_multipart(req.headers()) {
        prepare_multipart(state, req, dialect).await
    } else {
        prepare_json(state, req, dialect, policy).await
    }
}

async fn prepare_json(
    state: &AppState,
    req: Request,
    dialect: Dialect,
    policy: StreamPolicy,
) -> Result<Inbound, GatewayError> {
    let map = read_json(req.into_body(), state.body_limit()).await?;
    let shaped = split_control_fields(map);
    state.guard.require(shaped.control.security_key.as_deref())?;

    if policy == StreamPolicy::Reject && wants_stream(&shaped.body) {
        return Err(GatewayError::bad_request(
            "streaming is not supported on this endpoint",
        ));
    }
    let opts = shaped.control.call_options(&state.config.upstream)?;
    let attachments = shaped.control.attachments()?;
    if let Some(note) = shaped.control.describe_overrides() {
        tracing::info!("{}", note);
    }

    let mut body = merge_attachments(dialect, shaped.body, None, &attachments)?;
    ensure_model(&mut body, &state.config.defaults.model);
    Ok(Inbound {
        opts,
        body,
        uploaded: None,
    })
}

fn is_inline_image(field_name: &str, mime_type: &str) -> bool {
    field_name == "image" && mime_type.to_ascii_lowercase().starts_with("image/")
}

async fn prepare_multipart(
    state: &AppState,
    req: Request,
    dialect: Dialect,
) -> Result<Inbound, GatewayError> {
    let form = read_multipart(req).await?;
    state.guard.require(form_security_key(&form.fields).as_deref())?;

    let shaped = split_control_fields(payload_from_form(&form.fields)?);
    if wants_stream(&shaped.body) {
        return Err(GatewayError::bad_request(
            "streaming is not supported for multipart requests",
        ));
    }
    check_attachment_target(dialect, &shaped.body)?;
    let mut control = shaped.control;
    control.fill_missing_from(ControlFields::from_form(&form.fields));
    let opts = control.call_options(&state.config.upstream)?;
    let mut attachments = control.attachments()?;
    if let Some(note) = control.describe_overrides() {
        tracing::info!("{}", note);
    }

    let (images, files): (Vec<_>, Vec<_>) = form
        .files
        .into_iter()
        .partition(|f| is_inline_image(&f.field_name, &f.mime_type));
    attachments.extend(
        images
            .iter()
            .map(|img| Attachment::inline_image(&img.mime_type, &img.bytes)),
    );

    let purpose = form
        .fields
        .first_non_empty(&["file_purpose", "purpose"])
        .unwrap_or(state.config.defaults.file_purpose.as_str())
        .to_string();
    let uploaded = upload_parts(state, &opts, files, &purpose).await?;
    attachments.extend(uploaded.iter().map(|u| Attachment::File {
        file_id: u.file_id.clone(),
    }));

    let text = form
        .fields
        .first_non_empty(&["prompt", "message", "input_text"]);
    let mut body = merge_attachments(dialect, shaped.body, text, &attachments)?;
    ensure_model(&mut body, &state.config.defaults.model);
    Ok(Inbound {
        opts,
        body,
        uploaded: Some(uploaded),
    })
}
