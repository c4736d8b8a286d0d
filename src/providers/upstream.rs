use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::GatewayError;

/// 上游 responses 流：每一项是一个已解析的事件对象（携带 `type` 字段）
pub type ResponseEventStream = BoxStream<'static, Result<Value, GatewayError>>;

/// 单次调用的凭据与超时；未覆盖的字段由配置默认值补齐
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub timeout: Option<Duration>,
}

pub enum UploadSource {
    Memory(Vec<u8>),
    /// 临时文件的只读句柄，按流上传
    File { file: tokio::fs::File, len: u64 },
}

pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub source: UploadSource,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptionParams {
    pub model: String,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub response_format: Option<String>,
    pub temperature: Option<String>,
    pub timestamp_granularities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transcript {
    Json(Value),
    /// text / srt / vtt 格式
    Text(String),
}

/// 上游能力接口；网关只组合这些调用，不实现任何上游语义
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn create_chat_completion(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError>;

    async fn create_response(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError>;

    async fn stream_response(
        &self,
        opts: &CallOptions,
        body: Value,
    ) -> Result<ResponseEventStream, GatewayError>;

    async fn retrieve_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError>;

    async fn cancel_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError>;

    async fn delete_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError>;

    async fn list_input_items(
        &self,
        opts: &CallOptions,
        id: &str,
        query: &[(String, String)],
    ) -> Result<Value, GatewayError>;

    async fn create_embedding(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError>;

    async fn transcribe_audio(
        &self,
        opts: &CallOptions,
        audio: UploadFile,
        params: TranscriptionParams,
    ) -> Result<Transcript, GatewayError>;

    async fn upload_file(
        &self,
        opts: &CallOptions,
        file: UploadFile,
        purpose: &str,
    ) -> Result<Value, GatewayError>;

    async fn list_models(&self, opts: &CallOptions) -> Result<Value, GatewayError>;

    async fn retrieve_model(&self, opts: &CallOptions, model: &str) -> Result<Value, GatewayError>;
}
