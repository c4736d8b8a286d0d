use serde_json::Value;

// usage 结构与 async-openai 对齐
pub use async_openai::types::CompletionUsage as Usage;

/// 统一后的 token 用量：chat 的 prompt/cached/completion 与 responses 的 input/cached/output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub cached_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn from_chat_completion(response: &Value) -> Option<Self> {
        let usage: Usage = serde_json::from_value(response.get("usage")?.clone()).ok()?;
        Some(Self {
            prompt_tokens: u64::from(usage.prompt_tokens),
            cached_tokens: usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens)
                .map(u64::from)
                .unwrap_or(0),
            completion_tokens: u64::from(usage.completion_tokens),
        })
    }

    pub fn from_response(response: &Value) -> Option<Self> {
        let usage = response.get("usage")?;
        let input = usage.get("input_tokens")?.as_u64()?;
        let output = usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let cached = usage
            .get("input_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Some(Self {
            prompt_tokens: input,
            cached_tokens: cached,
            completion_tokens: output,
        })
    }

    /// embeddings 只有 prompt_tokens / total_tokens
    pub fn from_embedding(response: &Value) -> Option<Self> {
        let prompt = response.get("usage")?.get("prompt_tokens")?.as_u64()?;
        Some(Self {
            prompt_tokens: prompt,
            ..Default::default()
        })
    }

    /// 流式场景：只有 `response.completed` 事件里带最终 usage
    pub fn from_response_event(event: &Value) -> Option<Self> {
        if event.get("type").and_then(Value::as_str) != Some("response.completed") {
            return None;
        }
        Self::from_response(event.get("response")?)
    }
}
