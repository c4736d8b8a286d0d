use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub security: SecurityConfig,
    pub defaults: DefaultsConfig,
    pub diagnostics: DiagnosticsConfig,
    pub uploads: UploadsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单个请求的总时长上限（上游 responses 可能很慢）
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            request_timeout_secs: 15 * 60,
            max_body_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            organization: None,
            project: None,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub security_key: Option<String>,
    pub log_access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub model: String,
    pub embedding_model: String,
    pub transcription_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub file_purpose: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            transcription_model: "whisper-1".to_string(),
            temperature: 0.5,
            top_p: 0.5,
            file_purpose: "user_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub info_capacity: usize,
    pub error_capacity: usize,
    pub cooldown_secs: u64,
    pub entry_max_chars: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            info_capacity: 10,
            error_capacity: 10,
            cooldown_secs: 10,
            entry_max_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub temp_dir: PathBuf,
    /// false 时转写音频直接以内存句柄上传，不落盘
    pub transcription_via_temp_file: bool,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("llm-relay-uploads"),
            transcription_via_temp_file: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // .env.local 优先于 .env（dotenvy 不覆盖已存在的变量）
        for name in [".env.local", ".env"] {
            if Path::new(name).exists() {
                dotenvy::from_filename(name)?;
            }
        }

        let mut settings = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str::<Settings>(&content)?
            }
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn find_config_file() -> Option<String> {
        let possible_names = ["custom-config.toml", "config.toml"];
        possible_names
            .iter()
            .find(|name| Path::new(name).exists())
            .map(|name| name.to_string())
    }

    /// 环境变量覆盖配置文件；空字符串视为未设置
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(port) = get("PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.upstream.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_ORGANIZATION") {
            self.upstream.organization = Some(v);
        }
        if let Some(v) = get("OPENAI_PROJECT") {
            self.upstream.project = Some(v);
        }
        if let Some(v) = get("SECURITY_KEY") {
            self.security.security_key = Some(v);
        }
        if let Some(v) = get("LOG_ACCESS_TOKEN") {
            self.security.log_access_token = Some(v);
        }
        if let Some(v) = get("DEFAULT_MODEL") {
            self.defaults.model = v;
        }
        if let Some(v) = get("UPLOAD_TEMP_DIR") {
            self.uploads.temp_dir = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_usable_without_config_file() {
        let s = Settings::default();
        assert_eq!(s.server.port, 3002);
        assert_eq!(s.server.request_timeout_secs, 900);
        assert_eq!(s.diagnostics.cooldown_secs, 10);
        assert!(s.security.security_key.is_none());
        assert!(s.uploads.transcription_via_temp_file);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let s: Settings = toml::from_str(
            r#"
            [server]
            port = 9000

            [defaults]
            model = "gpt-4.1"
            "#,
        )
        .unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.defaults.model, "gpt-4.1");
        assert_eq!(s.defaults.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn env_overrides_ignore_blank_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SECURITY_KEY", "s3cret"),
            ("LOG_ACCESS_TOKEN", "   "),
            ("PORT", "8080"),
            ("DEFAULT_MODEL", "gpt-4o"),
        ]);
        let mut s = Settings::default();
        s.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.security.security_key.as_deref(), Some("s3cret"));
        assert!(s.security.log_access_token.is_none());
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.defaults.model, "gpt-4o");
    }
}
