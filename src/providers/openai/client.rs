use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use reqwest_eventsource::RequestBuilderExt;
use serde_json::{Value, json};

use crate::config::settings::UpstreamConfig;
use crate::error::GatewayError;
use crate::http_client::{join_endpoint, upstream_client};
use crate::providers::streaming::open_response_stream;
use crate::providers::upstream::{
    CallOptions, ResponseEventStream, Transcript, TranscriptionParams, UploadFile, UploadSource,
    Upstream,
};

/// 基于 reqwest 的 OpenAI 适配器：请求体按原样透传，未知字段不做任何处理
pub struct OpenAIUpstream {
    http: reqwest::Client,
    base_url: String,
}

/// 非 2xx 响应转成结构化的上游错误；非 JSON 错误体包成 {"message": ...}
pub(crate) fn upstream_error(status: reqwest::StatusCode, bytes: &[u8]) -> GatewayError {
    let body = serde_json::from_slice::<Value>(bytes).unwrap_or_else(|_| {
        json!({ "message": String::from_utf8_lossy(bytes).trim() })
    });
    GatewayError::Upstream {
        status: status.as_u16(),
        body,
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let bytes = response.bytes().await.unwrap_or_default();
    Err(upstream_error(status, &bytes))
}

async fn send_json(req: RequestBuilder) -> Result<Value, GatewayError> {
    let response = ensure_success(req.send().await?).await?;
    Ok(response.json::<Value>().await?)
}

impl UploadFile {
    fn into_part(self) -> Result<Part, GatewayError> {
        let part = match self.source {
            UploadSource::Memory(bytes) => Part::bytes(bytes),
            UploadSource::File { file, len } => {
                Part::stream_with_length(reqwest::Body::from(file), len)
            }
        };
        Ok(part.file_name(self.filename).mime_str(&self.mime_type)?)
    }
}

impl OpenAIUpstream {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http: upstream_client(cfg)?,
            base_url: cfg.base_url.clone(),
        })
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        opts: &CallOptions,
    ) -> Result<RequestBuilder, GatewayError> {
        let api_key = opts
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GatewayError::Config("upstream API key is not configured".into()))?;

        let url = join_endpoint(&self.base_url, endpoint);
        let mut req = self.http.request(method, url).bearer_auth(api_key);
        if let Some(org) = opts.organization.as_deref().filter(|s| !s.is_empty()) {
            req = req.header("OpenAI-Organization", org);
        }
        if let Some(project) = opts.project.as_deref().filter(|s| !s.is_empty()) {
            req = req.header("OpenAI-Project", project);
        }
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }
        Ok(req)
    }

    fn post_json(
        &self,
        endpoint: &str,
        opts: &CallOptions,
        body: &Value,
    ) -> Result<RequestBuilder, GatewayError> {
        Ok(self
            .request(Method::POST, endpoint, opts)?
            .header(CONTENT_TYPE, "application/json")
            .json(body))
    }
}

#[async_trait]
impl Upstream for OpenAIUpstream {
    async fn create_chat_completion(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        send_json(self.post_json("chat/completions", opts, &body)?).await
    }

    async fn create_response(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        send_json(self.post_json("responses", opts, &body)?).await
    }

    async fn stream_response(
        &self,
        opts: &CallOptions,
        mut body: Value,
    ) -> Result<ResponseEventStream, GatewayError> {
        if let Some(map) = body.as_object_mut() {
            map.insert("stream".into(), Value::Bool(true));
        }
        let es = self
            .post_json("responses", opts, &body)?
            .header(ACCEPT, "text/event-stream")
            .eventsource()
            .map_err(|e| GatewayError::Stream(e.to_string()))?;
        open_response_stream(es).await
    }

    async fn retrieve_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        send_json(self.request(Method::GET, &format!("responses/{}", id), opts)?).await
    }

    async fn cancel_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        send_json(self.request(Method::POST, &format!("responses/{}/cancel", id), opts)?).await
    }

    async fn delete_response(&self, opts: &CallOptions, id: &str) -> Result<Value, GatewayError> {
        send_json(self.request(Method::DELETE, &format!("responses/{}", id), opts)?).await
    }

    async fn list_input_items(
        &self,
        opts: &CallOptions,
        id: &str,
        query: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        let req = self
            .request(Method::GET, &format!("responses/{}/input_items", id), opts)?
            .query(query);
        send_json(req).await
    }

    async fn create_embedding(&self, opts: &CallOptions, body: Value) -> Result<Value, GatewayError> {
        send_json(self.post_json("embeddings", opts, &body)?).await
    }

    async fn transcribe_audio(
        &self,
        opts: &CallOptions,
        audio: UploadFile,
        params: TranscriptionParams,
    ) -> Result<Transcript, GatewayError> {
        let mut form = Form::new()
            .text("model", params.model)
            .part("file", audio.into_part()?);
        for (name, value) in [
            ("language", params.language),
            ("prompt", params.prompt),
            ("response_format", params.response_format),
            ("temperature", params.temperature),
        ] {
            if let Some(v) = value.filter(|s| !s.trim().is_empty()) {
                form = form.text(name, v);
            }
        }
        for g in params.timestamp_granularities {
            form = form.text("timestamp_granularities[]", g);
        }

        let req = self
            .request(Method::POST, "audio/transcriptions", opts)?
            .multipart(form);
        let response = ensure_success(req.send().await?).await?;
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let bytes = response.bytes().await?;
        if is_json {
            Ok(Transcript::Json(serde_json::from_slice(&bytes)?))
        } else {
            Ok(Transcript::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    async fn upload_file(
        &self,
        opts: &CallOptions,
        file: UploadFile,
        purpose: &str,
    ) -> Result<Value, GatewayError> {
        let form = Form::new()
            .text("purpose", purpose.to_string())
            .part("file", file.into_part()?);
        send_json(self.request(Method::POST, "files", opts)?.multipart(form)).await
    }

    async fn list_models(&self, opts: &CallOptions) -> Result<Value, GatewayError> {
        send_json(self.request(Method::GET, "models", opts)?).await
    }

    async fn retrieve_model(&self, opts: &CallOptions, model: &str) -> Result<Value, GatewayError> {
        send_json(self.request(Method::GET, &format!("models/{}", model), opts)?).await
    }
}
