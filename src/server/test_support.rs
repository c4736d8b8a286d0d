use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header;
use axum::response::Response;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

use crate::config::Settings;
use crate::error::GatewayError;
use crate::providers::{
    CallOptions, ResponseEventStream, Transcript, TranscriptionParams, UploadFile, UploadSource,
    Upstream,
};
use crate::server::AppState;

pub const SECRET: &str = "s3cret";
pub const LOG_TOKEN: &str = "logtoken";

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub filename: String,
    pub mime_type: String,
    pub purpose: String,
    pub bytes: Vec<u8>,
    pub streamed: bool,
}

/// 进程内上游替身：记录每次调用，可切换为固定失败
#[derive(Default)]
pub struct MockUpstream {
    calls: Mutex<Vec<&'static str>>,
    bodies: Mutex<Vec<Value>>,
    options: Mutex<Vec<CallOptions>>,
    uploads: Mutex<Vec<RecordedUpload>>,
    transcriptions: Mutex<Vec<(RecordedUpload, TranscriptionParams)>>,
    queries: Mutex<Vec<Vec<(String, String)>>>,
    failure: Mutex<Option<(u16, Value)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockUpstream {
    pub fn failing(status: u16, body: Value) -> Self {
        let mock = Self::default();
        *mock.failure.lock().unwrap() = Some((status, body));
        mock
    }

    /// chat 调用在返回前先睡 `delay`
    pub fn slow(delay: Duration) -> Self {
        let mock = Self::default();
        *mock.delay.lock().unwrap() = Some(delay);
        mock
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.bodies.lock().unwrap().last().cloned()
    }

    pub fn last_options(&self) -> Option<CallOptions> {
        self.options.lock().unwrap().last().cloned()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn transcriptions(&self) -> Vec<(RecordedUpload, TranscriptionParams)> {
        self.transcriptions.lock().unwrap().clone()
    }

    pub fn last_query(&self) -> Option<Vec<(String, String)>> {
        self.queries.lock().unwrap().last().cloned()
    }

    fn enter(&self, op: &'static str, opts: &CallOptions, body: Option<&Value>) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(op);
        self.options.lock().unwrap().push(opts.clone());
        if let Some(b) = body {
            self.bodies.lock().unwrap().push(b.clone());
        }
        match self.failure.lock().unwrap().clone() {
            Some((status, body)) => Err(GatewayError::Upstream { status, body }),
            None => Ok(()),
        }
    }

    async fn record_file(file: UploadFile, purpose: &str) -> RecordedUpload {
        let streamed = matches!(file.source, UploadSource::File { .. });
        let bytes = match file.source {
            UploadSource::Memory(bytes) => bytes,
            UploadSource::File { mut file, .. } => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await.unwrap();
                buf
            }
        };
        RecordedUpload {
            filename: file.filename,
            mime_type: file.mime_type,
            purpose: purpose.to_string(),
            bytes,
            streamed,
        }
    }
}

fn usage_chat() -> Value {
    json!({"prompt_tokens": 11, "completion_tokens": 4, "total_tokens": 15,
           "prompt_tokens_details": {"cached_tokens": 2}})
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn create_chat_completion(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        self.enter("chat", opts, Some(&body))?;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
            "usage": usage_chat(),
        }))
    }

    async fn create_response(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        self.enter("responses", opts, Some(&body))?;
        Ok(json!({
            "id": "resp_1",
            "object": "response",
            "output_text": "hi",
            "usage": {"input_tokens": 21, "output_tokens": 6, "input_tokens_details": {"cached_tokens": 1}},
        }))
    }

    async fn stream_response(&self, opts: &CallOptions, body: Value) -> Result<ResponseEventStream, GatewayError> {
        self.enter("responses_stream", opts, Some(&body))?;
        Ok(stream::iter(vec![
            Ok(json!({"type": "response.created", "response": {"id": "resp_s"}})),
            Ok(json!({"type": "response.output_text.delta", "delta": "hi"})),
            Ok(json!({
                "type": "response.completed",
                "response": {"id": "resp_s", "usage": {"input_tokens": 9, "output_tokens": 2}}
            })),
        ])
        .boxed())
    }

    async fn retrieve_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        self.enter("retrieve", opts, None)?;
        Ok(json!({"id": id, "object": "response", "status": "completed"}))
    }

    async fn cancel_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        self.enter("cancel", opts, None)?;
        Ok(json!({"id": id, "object": "response", "status": "cancelled"}))
    }

    async fn delete_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        self.enter("delete", opts, None)?;
        Ok(json!({"id": id, "object": "response", "deleted": true}))
    }

    async fn list_input_items(
        &self,
        opts: &CallOptions,
        id: &str,
        query: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        self.enter("input_items", opts, None)?;
        self.queries.lock().unwrap().push(query.to_vec());
        Ok(json!({"object": "list", "data": [], "first_id": id}))
    }

    async fn create_embedding(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        self.enter("embeddings", opts, Some(&body))?;
        Ok(json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}],
            "usage": {"prompt_tokens": 3, "total_tokens": 3},
        }))
    }

    async fn transcribe_audio(
        &self,
        opts: &CallOptions,
        audio: UploadFile,
        params: TranscriptionParams,
    ) -> Result<Transcript, GatewayError> {
        self.calls.lock().unwrap().push("transcribe");
        self.options.lock().unwrap().push(opts.clone());
        let recorded = Self::record_file(audio, "").await;
        self.transcriptions
            .lock()
            .unwrap()
            .push((recorded, params.clone()));
        if let Some((status, body)) = self.failure.lock().unwrap().clone() {
            return Err(GatewayError::Upstream { status, body });
        }
        match params.response_format.as_deref() {
            Some("text" | "srt" | "vtt") => Ok(Transcript::Text("hello world".into())),
            _ => Ok(Transcript::Json(json!({"text": "hello world"}))),
        }
    }

    async fn upload_file(&self, opts: &CallOptions, file: UploadFile, purpose: &str) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push("upload");
        self.options.lock().unwrap().push(opts.clone());
        let recorded = Self::record_file(file, purpose).await;
        if let Some((status, body)) = self.failure.lock().unwrap().clone() {
            return Err(GatewayError::Upstream { status, body });
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(recorded);
        Ok(json!({"id": format!("file-{}", uploads.len()), "object": "file"}))
    }

    async fn list_models(&self, opts: &CallOptions) -> Result<Value, GatewayError> {
        self.enter("list_models", opts, None)?;
        Ok(json!({"object": "list", "data": [{"id": "gpt-4.1-mini"}, {"id": "whisper-1"}]}))
    }

    async fn retrieve_model(&self, opts: &CallOptions, model: &str) -> Result<Value, GatewayError> {
        self.enter("retrieve_model", opts, None)?;
        Ok(json!({"id": model, "object": "model"}))
    }
}

pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.security.security_key = Some(SECRET.into());
    settings.security.log_access_token = Some(LOG_TOKEN.into());
    settings.upstream.api_key = Some("sk-default-key-0000".into());
    settings.uploads.temp_dir = dir.join("uploads");
    settings
}

pub fn test_state(dir: &Path, upstream: Arc<MockUpstream>) -> Arc<AppState> {
    Arc::new(AppState::new(test_settings(dir), upstream))
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

/// 临时目录里残留的文件数（目录不存在算 0）
pub fn temp_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("uploads"))
        .map(|d| d.count())
        .unwrap_or(0)
}
