use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{HeaderMap, StatusCode, header};
use futures_util::StreamExt;
use serde_json::{Map, Value};

use crate::error::GatewayError;

pub const DEFAULT_FILENAME: &str = "file";
pub const DEFAULT_MIME: &str = "application/octet-stream";

pub fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// 按块累积请求体；超过上限按 400 处理
pub async fn read_body(body: Body, limit: usize) -> Result<Vec<u8>, GatewayError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(GatewayError::bad_request("request body too large"));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// JSON 请求体必须是对象；空 body 视为 `{}`
pub async fn read_json(body: Body, limit: usize) -> Result<Map<String, Value>, GatewayError> {
    let bytes = read_body(body, limit).await?;
    parse_json_object(&bytes)
}

pub fn parse_json_object(bytes: &[u8]) -> Result<Map<String, Value>, GatewayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::bad_request("JSON body must be an object")),
        Err(e) => Err(GatewayError::bad_request(format!("invalid JSON: {}", e))),
    }
}

/// 表单文本字段；同名字段按出现顺序保留
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    values: HashMap<String, Vec<String>>,
}

impl FormFields {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_default().push(value.into());
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 依次尝试多个字段名，返回第一个去空白后非空的值
    pub fn first_non_empty(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .flat_map(|name| self.get_all(name))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFilePart {
    pub field_name: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedFilePart {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct MultipartBody {
    pub fields: FormFields,
    pub files: Vec<UploadedFilePart>,
}

fn is_file_part(filename: Option<&str>, content_type: Option<&str>) -> bool {
    if filename.is_some() {
        return true;
    }
    match content_type {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            !(ct.starts_with("text/plain") || ct.starts_with("application/json"))
        }
        None => false,
    }
}

/// 解析 multipart/form-data：文本部分进字段表，文件部分逐块读入各自的缓冲区。
/// 缺少边界等请求级问题是 400；流本身损坏（半截 part 等）是 500。
pub async fn read_multipart(req: Request) -> Result<MultipartBody, GatewayError> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|rejection| GatewayError::bad_request(rejection.body_text()))?;

    let mut out = MultipartBody::default();
    while let Some(mut field) = multipart.next_field().await.map_err(classify)? {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(classify)? {
            bytes.extend_from_slice(&chunk);
        }

        if is_file_part(filename.as_deref(), content_type.as_deref()) {
            out.files.push(UploadedFilePart {
                field_name: name,
                filename: filename
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
                mime_type: content_type
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MIME.to_string()),
                bytes,
            });
        } else {
            out.fields
                .insert(name, String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    Ok(out)
}

fn classify(err: axum::extract::multipart::MultipartError) -> GatewayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::bad_request("request body too large")
    } else {
        GatewayError::Multipart(err)
    }
}
