use std::time::Duration;

use crate::config::settings::UpstreamConfig;

/// 拼接上游端点：既支持 base_url=.../v1，也容忍 endpoint 前后多余的 `/`
pub fn join_endpoint(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", base, endpoint)
}

/// 上游客户端只设连接超时；整体超时按请求设置（默认由服务端 15 分钟上限兜底）
pub fn upstream_client(cfg: &UpstreamConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}
