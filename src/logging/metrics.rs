use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::providers::openai::TokenUsage;

/// 进程级计数器。每次更新都是单条原子操作，不保证跨请求的线性一致，仅用于诊断展示。
#[derive(Default)]
pub struct Metrics {
    request_count: AtomicU64,
    total_request_ms: AtomicU64,
    max_request_ms: AtomicU64,
    current_parallel: AtomicU64,
    max_parallel: AtomicU64,
    max_prompt_tokens: AtomicU64,
    max_cached_tokens: AtomicU64,
    max_completion_tokens: AtomicU64,
    error_count: AtomicU64,
    last_diagnostic_access: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub total_request_ms: u64,
    pub max_request_ms: u64,
    pub current_parallel_requests: u64,
    pub max_parallel_requests: u64,
    pub max_prompt_tokens: u64,
    pub max_cached_tokens: u64,
    pub max_completion_tokens: u64,
    pub error_count: u64,
    pub last_diagnostic_access: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    pub fn average_request_ms(&self) -> u64 {
        if self.request_count == 0 {
            0
        } else {
            self.total_request_ms / self.request_count
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, elapsed: Duration) {
        let ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_request_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_request_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn record_usage(&self, usage: &TokenUsage) {
        self.max_prompt_tokens
            .fetch_max(usage.prompt_tokens, Ordering::Relaxed);
        self.max_cached_tokens
            .fetch_max(usage.cached_tokens, Ordering::Relaxed);
        self.max_completion_tokens
            .fetch_max(usage.completion_tokens, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_diagnostic_access(&self, at: DateTime<Utc>) {
        *self
            .last_diagnostic_access
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// 进入上游调用临界区；返回的 guard 在 drop 时递减并发计数（成功、出错、被取消都一样）
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current_parallel.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            total_request_ms: self.total_request_ms.load(Ordering::Relaxed),
            max_request_ms: self.max_request_ms.load(Ordering::Relaxed),
            current_parallel_requests: self.current_parallel.load(Ordering::SeqCst),
            max_parallel_requests: self.max_parallel.load(Ordering::SeqCst),
            max_prompt_tokens: self.max_prompt_tokens.load(Ordering::Relaxed),
            max_cached_tokens: self.max_cached_tokens.load(Ordering::Relaxed),
            max_completion_tokens: self.max_completion_tokens.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_diagnostic_access: *self
                .last_diagnostic_access
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }
}

pub struct InFlightGuard {
    metrics: Arc<Metrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.current_parallel.fetch_sub(1, Ordering::SeqCst);
    }
}
