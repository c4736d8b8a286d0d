use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,

    /// 上游返回的结构化 API 错误（状态码 + 原始错误体）
    #[error("upstream API error {status}: {body}")]
    Upstream { status: u16, body: Value },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Body error: {0}")]
    Body(#[from] axum::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Upstream stream error: {0}")]
    Stream(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 上游 2xx 但响应缺少必要字段（例如文件上传没有 id）
    #[error("Unexpected upstream response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Http(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::Body(_)
            | Self::Multipart(_)
            | Self::Stream(_)
            | Self::Config(_)
            | Self::UnexpectedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 只有上游失败和内部失败需要进入错误日志并计数；
    /// 鉴权/校验/限流在本地处理，不算错误。
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. }
                | Self::Http(_)
                | Self::Json(_)
                | Self::Io(_)
                | Self::Body(_)
                | Self::Multipart(_)
                | Self::Stream(_)
                | Self::Config(_)
                | Self::UnexpectedResponse(_)
        )
    }
}

fn plain(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Self::Forbidden => plain(status, "Forbidden".into()),
            Self::BadRequest(msg) => plain(status, format!("Bad Request: {}", msg)),
            Self::RateLimited => plain(status, "Too Many Requests".into()),
            Self::NotFound => plain(status, "Not Found".into()),
            Self::Upstream { body, .. } => {
                // OpenAI 风格的错误体本身就是 {"error": {...}}，这里统一包一层
                let error = match body {
                    Value::Object(mut map) if map.contains_key("error") => {
                        map.remove("error").unwrap_or(Value::Null)
                    }
                    other => other,
                };
                (status, Json(json!({ "error": error }))).into_response()
            }
            _ => plain(status, "Internal Server Error".into()),
        }
    }
}
