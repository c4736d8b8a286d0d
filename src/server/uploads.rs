use serde::Serialize;

use crate::error::GatewayError;
use crate::providers::{CallOptions, UploadFile, UploadSource};
use crate::server::AppState;
use crate::server::body::UploadedFilePart;
use crate::server::payload::to_safe_filename;
use crate::server::request_logging::track;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadedFileInfo {
    pub file_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// 逐个经临时文件把表单文件传给上游，按原顺序返回 file id
pub async fn upload_parts(
    state: &AppState,
    opts: &CallOptions,
    parts: Vec<UploadedFilePart>,
    purpose: &str,
) -> Result<Vec<UploadedFileInfo>, GatewayError> {
    let mut uploaded = Vec::with_capacity(parts.len());
    for part in parts {
        let filename = to_safe_filename(&part.filename, "file");
        let size = part.size();
        let upstream = state.upstream.as_ref();
        let diag = state.diagnostics.as_ref();

        let response = state
            .temp
            .with_temp_file(&filename, &part.bytes, |tmp| {
                tracing::debug!(path = %tmp.path.display(), "staged upload");
                let file = UploadFile {
                    filename: filename.clone(),
                    mime_type: part.mime_type.clone(),
                    source: UploadSource::File {
                        file: tmp.file,
                        len: tmp.len,
                    },
                };
                async move { track(diag, upstream.upload_file(opts, file, purpose)).await }
            })
            .await?;

        let file_id = response
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::UnexpectedResponse("file upload returned no id".into()))?
            .to_string();
        state.diagnostics.log_info(format!(
            "uploaded {} ({} bytes, {}) as {}",
            filename, size, part.mime_type, file_id
        ));
        uploaded.push(UploadedFileInfo {
            file_id,
            filename,
            mime_type: part.mime_type,
            size,
        });
    }
    Ok(uploaded)
}
