use std::future::Future;
use std::time::Instant;

use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::GatewayError;
use crate::logging::Diagnostics;
use crate::providers::openai::TokenUsage;
use crate::server::util::summarize_json;

const SUMMARY_CHARS: usize = 600;

/// 包住一次上游调用：进入并发计数临界区，结束时（含出错）记录耗时
pub async fn track<F, T>(diag: &Diagnostics, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    let _in_flight = diag.metrics.enter();
    let started = Instant::now();
    let out = call.await;
    diag.metrics.record_request(started.elapsed());
    out
}

// 成功：更新 token 高水位并写一条请求 + 响应的组合日志
pub fn record_success(
    diag: &Diagnostics,
    label: &str,
    request: &Value,
    response: &Value,
    usage: Option<TokenUsage>,
) {
    if let Some(usage) = usage.as_ref() {
        diag.metrics.record_usage(usage);
    }
    diag.log_info(format!(
        "{} request: {} | response: {}",
        label,
        summarize_json(request, SUMMARY_CHARS),
        summarize_json(response, SUMMARY_CHARS)
    ));
}

/// 只有上游/内部失败进入错误日志并计数；鉴权、校验、限流不算
pub fn record_failure(diag: &Diagnostics, label: &str, err: &GatewayError) {
    if err.is_failure() {
        diag.metrics.record_error();
        diag.log_error(format!("{} failed: {}", label, err));
    }
}

/// handler 的唯一出口：失败在这里记录一次，再翻译成响应
pub fn finish(diag: &Diagnostics, label: &str, result: Result<Response, GatewayError>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => {
            record_failure(diag, label, &err);
            err.into_response()
        }
    }
}
