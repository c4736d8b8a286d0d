use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::settings::UpstreamConfig;
use crate::error::GatewayError;
use crate::providers::CallOptions;
use crate::server::body::FormFields;
use crate::server::util::mask_key;

/// 只在本地消费、绝不转发给上游的键
pub const RESERVED_KEYS: [&str; 7] = [
    "security_key",
    "openai_api_key",
    "organization",
    "project",
    "timeout_ms",
    "image",
    "file_ids",
];

/// 请求里可识别的控制字段。这里只做拆分，不做校验，
/// 好让鉴权先于任何 400 发生。
#[derive(Debug, Clone, Default)]
pub struct ControlFields {
    pub security_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub timeout_ms: Option<Value>,
    pub image: Option<Value>,
    pub file_ids: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ShapedPayload {
    pub control: ControlFields,
    /// 其余键按原顺序透传
    pub body: Map<String, Value>,
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.shift_remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

fn take_value(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    map.shift_remove(key).filter(|v| !v.is_null())
}

pub fn split_control_fields(mut body: Map<String, Value>) -> ShapedPayload {
    let control = ControlFields {
        security_key: take_string(&mut body, "security_key"),
        openai_api_key: take_string(&mut body, "openai_api_key"),
        organization: take_string(&mut body, "organization"),
        project: take_string(&mut body, "project"),
        timeout_ms: take_value(&mut body, "timeout_ms"),
        image: take_value(&mut body, "image"),
        file_ids: take_value(&mut body, "file_ids"),
    };
    ShapedPayload { control, body }
}

impl ControlFields {
    /// multipart 表单里的同名字段；图片用 image_url 或 image_base64 + image_mime_type 表达
    pub fn from_form(fields: &FormFields) -> Self {
        let text = |name: &str| fields.first_non_empty(&[name]).map(str::to_string);
        let image = match (text("image_url"), text("image_base64")) {
            (Some(url), _) => Some(json!({ "url": url })),
            (None, Some(data)) => Some(json!({
                "base64": data,
                "mime_type": text("image_mime_type"),
            })),
            (None, None) => None,
        };
        let ids: Vec<Value> = fields
            .get_all("file_ids")
            .iter()
            .chain(fields.get_all("file_ids[]"))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();

        Self {
            security_key: text("security_key"),
            openai_api_key: text("openai_api_key"),
            organization: text("organization"),
            project: text("project"),
            timeout_ms: text("timeout_ms").map(Value::String),
            image,
            file_ids: (!ids.is_empty()).then_some(Value::Array(ids)),
        }
    }

    /// payload 里已经给出的值优先，表单字段只补缺
    pub fn fill_missing_from(&mut self, other: ControlFields) {
        self.security_key = self.security_key.take().or(other.security_key);
        self.openai_api_key = self.openai_api_key.take().or(other.openai_api_key);
        self.organization = self.organization.take().or(other.organization);
        self.project = self.project.take().or(other.project);
        self.timeout_ms = self.timeout_ms.take().or(other.timeout_ms);
        self.image = self.image.take().or(other.image);
        self.file_ids = match (self.file_ids.take(), other.file_ids) {
            (Some(Value::Array(mut a)), Some(Value::Array(b))) => {
                a.extend(b);
                Some(Value::Array(a))
            }
            (mine, theirs) => mine.or(theirs),
        };
    }

    /// 单次调用的凭据：显式覆盖优先，否则用配置默认值
    pub fn call_options(&self, cfg: &UpstreamConfig) -> Result<CallOptions, GatewayError> {
        Ok(CallOptions {
            api_key: self.openai_api_key.clone().or_else(|| cfg.api_key.clone()),
            organization: self.organization.clone().or_else(|| cfg.organization.clone()),
            project: self.project.clone().or_else(|| cfg.project.clone()),
            timeout: parse_timeout(self.timeout_ms.as_ref())?,
        })
    }

    /// image 与 file_ids 转成附件；来源不完整直接 400，不会静默丢掉
    pub fn attachments(&self) -> Result<Vec<Attachment>, GatewayError> {
        let mut out = Vec::new();
        if let Some(image) = &self.image {
            let spec: ImageSpec = serde_json::from_value(image.clone())
                .map_err(|_| GatewayError::bad_request("image must be an object"))?;
            out.push(spec.into_attachment()?);
        }
        match &self.file_ids {
            None => {}
            Some(Value::String(id)) => out.push(Attachment::file(id)?),
            Some(Value::Array(ids)) => {
                for id in ids {
                    let id = id
                        .as_str()
                        .ok_or_else(|| GatewayError::bad_request("file_ids must be strings"))?;
                    out.push(Attachment::file(id)?);
                }
            }
            Some(_) => return Err(GatewayError::bad_request("file_ids must be a list of strings")),
        }
        Ok(out)
    }

    /// 不接收附件的端点：带了 image / file_ids 就 400
    pub fn reject_attachments(&self) -> Result<(), GatewayError> {
        if self.image.is_some() || self.file_ids.is_some() {
            return Err(GatewayError::bad_request(
                "image and file_ids are not supported on this endpoint",
            ));
        }
        Ok(())
    }

    /// 日志里只出现掩码后的覆盖凭据
    pub fn describe_overrides(&self) -> Option<String> {
        let key = self.openai_api_key.as_deref()?;
        Some(format!("api key override {}", mask_key(key)))
    }
}

fn parse_timeout(raw: Option<&Value>) -> Result<Option<Duration>, GatewayError> {
    let ms = match raw {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    match ms {
        Some(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(GatewayError::bad_request("timeout_ms must be a positive integer")),
    }
}

#[derive(Debug, Deserialize)]
struct ImageSpec {
    url: Option<String>,
    #[serde(alias = "data")]
    base64: Option<String>,
    mime_type: Option<String>,
    detail: Option<String>,
}

impl ImageSpec {
    fn into_attachment(self) -> Result<Attachment, GatewayError> {
        let detail = self.detail.filter(|d| !d.trim().is_empty());
        if let Some(url) = self.url.filter(|u| !u.trim().is_empty()) {
            return Ok(Attachment::Image { url, detail });
        }
        let Some(data) = self.base64.filter(|d| !d.trim().is_empty()) else {
            return Err(GatewayError::bad_request("image requires url or base64 data"));
        };
        let mime = self
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "image/png".to_string());
        Ok(Attachment::Image {
            url: image_data_url(&mime, &data)?,
            detail,
        })
    }
}

/// 已经是 data URL 的原样使用；否则校验 base64 后拼成 data URL
pub fn image_data_url(mime: &str, data: &str) -> Result<String, GatewayError> {
    let data = data.trim();
    if data.starts_with("data:") {
        return Ok(data.to_string());
    }
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    B64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| GatewayError::bad_request("image base64 data is not valid"))?;
    Ok(format!("data:{};base64,{}", mime, compact))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Image { url: String, detail: Option<String> },
    File { file_id: String },
}

impl Attachment {
    fn file(id: &str) -> Result<Self, GatewayError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(GatewayError::bad_request("file id must not be empty"));
        }
        Ok(Self::File {
            file_id: id.to_string(),
        })
    }

    pub fn inline_image(mime: &str, bytes: &[u8]) -> Self {
        Self::Image {
            url: format!("data:{};base64,{}", mime, B64_STANDARD.encode(bytes)),
            detail: None,
        }
    }
}

/// 两种上游消息结构：chat 的 messages 与 responses 的 input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    ChatCompletions,
    Responses,
}

impl Dialect {
    pub fn list_key(self) -> &'static str {
        match self {
            Dialect::ChatCompletions => "messages",
            Dialect::Responses => "input",
        }
    }

    fn text_part(self, text: &str) -> Value {
        match self {
            Dialect::ChatCompletions => json!({ "type": "text", "text": text }),
            Dialect::Responses => json!({ "type": "input_text", "text": text }),
        }
    }

    fn attachment_part(self, attachment: &Attachment) -> Value {
        match (self, attachment) {
            (Dialect::ChatCompletions, Attachment::Image { url, detail }) => {
                let mut image = json!({ "url": url });
                if let Some(d) = detail {
                    image["detail"] = Value::String(d.clone());
                }
                json!({ "type": "image_url", "image_url": image })
            }
            (Dialect::ChatCompletions, Attachment::File { file_id }) => {
                json!({ "type": "file", "file": { "file_id": file_id } })
            }
            (Dialect::Responses, Attachment::Image { url, detail }) => json!({
                "type": "input_image",
                "image_url": url,
                "detail": detail.as_deref().unwrap_or("auto"),
            }),
            (Dialect::Responses, Attachment::File { file_id }) => {
                json!({ "type": "input_file", "file_id": file_id })
            }
        }
    }
}

fn is_text_part(part: &Value) -> bool {
    matches!(
        part.get("type").and_then(Value::as_str),
        Some("text" | "input_text")
    )
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// 单个 user 条目：可选文本（去空白后非空才加）+ 按顺序的附件引用
pub fn build_input_with_files(dialect: Dialect, text: Option<&str>, attachments: &[Attachment]) -> Vec<Value> {
    let mut content = Vec::with_capacity(attachments.len() + 1);
    if let Some(t) = non_empty(text) {
        content.push(dialect.text_part(t));
    }
    content.extend(attachments.iter().map(|a| dialect.attachment_part(a)));
    vec![json!({ "role": "user", "content": content })]
}

/// 附件目标的形态
enum AttachmentTarget {
    Absent,
    PlainText(String),
    StructuredList(Vec<Value>),
}

fn classify_target(current: Option<Value>, key: &str) -> Result<AttachmentTarget, GatewayError> {
    match current {
        None | Some(Value::Null) => Ok(AttachmentTarget::Absent),
        Some(Value::String(s)) => Ok(AttachmentTarget::PlainText(s)),
        Some(Value::Array(items)) => Ok(AttachmentTarget::StructuredList(items)),
        Some(_) => Err(GatewayError::bad_request(format!(
            "{} must be a string or a list",
            key
        ))),
    }
}

/// 上传之前先确认附件目标的形态，避免文件已经传上去才报 400
pub fn check_attachment_target(dialect: Dialect, body: &Map<String, Value>) -> Result<(), GatewayError> {
    match body.get(dialect.list_key()) {
        None | Some(Value::Null | Value::String(_) | Value::Array(_)) => Ok(()),
        Some(_) => Err(GatewayError::bad_request(format!(
            "{} must be a string or a list",
            dialect.list_key()
        ))),
    }
}

/// 把附件并入 payload，返回新的 payload。
/// - 没有目标列表：新建一个 user 条目（文本 + 附件）
/// - 目标是字符串：转成 user 条目，原文本作为第一个文本部分
/// - 目标是列表：最后一个 content 为字符串或列表的 user 条目接收附件；
///   该条目还没有文本部分时才把 `text` 放到最前；找不到就追加新条目
///
/// 原有内容不删不改顺序，目标键写回原位；没有附件也没有需要补的文本时原样返回。
/// 多轮对话里附件挂在最新一轮的 user 条目上，不是第一个带 content 列表的条目。
pub fn merge_attachments(
    dialect: Dialect,
    mut body: Map<String, Value>,
    text: Option<&str>,
    attachments: &[Attachment],
) -> Result<Map<String, Value>, GatewayError> {
    let text = non_empty(text);
    if attachments.is_empty() && text.is_none() {
        return Ok(body);
    }
    let key = dialect.list_key();
    let parts = || attachments.iter().map(|a| dialect.attachment_part(a));

    let current = body.get_mut(key).map(Value::take);
    let merged = match classify_target(current, key)? {
        AttachmentTarget::Absent => Value::Array(build_input_with_files(dialect, text, attachments)),
        AttachmentTarget::PlainText(s) if attachments.is_empty() => Value::String(s),
        AttachmentTarget::PlainText(s) => Value::Array(build_input_with_files(dialect, Some(&s), attachments)),
        AttachmentTarget::StructuredList(mut items) => {
            let target = items.iter().rposition(|item| {
                item.get("role").and_then(Value::as_str) == Some("user")
                    && matches!(item.get("content"), Some(Value::String(_) | Value::Array(_)))
            });
            match target {
                Some(idx) => {
                    let entry = &mut items[idx];
                    match entry.get_mut("content") {
                        Some(Value::String(s)) if !attachments.is_empty() => {
                            let mut content = vec![dialect.text_part(s)];
                            content.extend(parts());
                            entry["content"] = Value::Array(content);
                        }
                        Some(Value::Array(content)) => {
                            if let Some(t) = text
                                && !content.iter().any(is_text_part)
                            {
                                content.insert(0, dialect.text_part(t));
                            }
                            content.extend(parts());
                        }
                        _ => {}
                    }
                }
                None => items.extend(build_input_with_files(dialect, text, attachments)),
            }
            Value::Array(items)
        }
    };
    match body.get_mut(key) {
        Some(slot) => *slot = merged,
        None => {
            body.insert(key.to_string(), merged);
        }
    }
    Ok(body)
}

/// 取最后一段路径并把 `[A-Za-z0-9._-]` 以外的字符换成 `_`；
/// 结果为空或只有点时依次退回 fallback、"file"
pub fn to_safe_filename(name: &str, fallback: &str) -> String {
    fn sanitize(raw: &str) -> Option<String> {
        let segment = raw.trim().rsplit(['/', '\\']).next().unwrap_or("");
        let cleaned: String = segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        (!cleaned.is_empty() && !cleaned.chars().all(|c| c == '.')).then_some(cleaned)
    }

    sanitize(name)
        .or_else(|| sanitize(fallback))
        .unwrap_or_else(|| "file".to_string())
}

/// 缺省或空的 model 用默认值补齐
pub fn ensure_model(body: &mut Map<String, Value>, default_model: &str) {
    let missing = match body.get("model") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    if missing {
        body.insert("model".into(), Value::String(default_model.to_string()));
    }
}

pub fn wants_stream(body: &Map<String, Value>) -> bool {
    match body.get("stream") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// multipart 表单转 payload：`payload` 字段里的 JSON 为准，
/// `model` 表单字段只在 payload 没给时补上
pub fn payload_from_form(fields: &FormFields) -> Result<Map<String, Value>, GatewayError> {
    let mut body = match fields.first_non_empty(&["payload"]) {
        Some(raw) => crate::server::body::parse_json_object(raw.as_bytes())
            .map_err(|_| GatewayError::bad_request("payload must be a JSON object"))?,
        None => Map::new(),
    };
    if let Some(model) = fields.first_non_empty(&["model"])
        && !body.contains_key("model")
    {
        body.insert("model".into(), Value::String(model.to_string()));
    }
    Ok(body)
}

/// 鉴权前只需要拿到密钥：表单字段优先，其次是 payload JSON 里的同名键
pub fn form_security_key(fields: &FormFields) -> Option<String> {
    if let Some(key) = fields.first_non_empty(&["security_key"]) {
        return Some(key.to_string());
    }
    let raw = fields.first_non_empty(&["payload"])?;
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(mut map) => take_string(&mut map, "security_key"),
        _ => None,
    }
}
