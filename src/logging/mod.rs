pub mod bounded;
pub mod metrics;
pub mod report;
pub mod time;

use std::sync::Arc;

use crate::config::settings::DiagnosticsConfig;

pub use bounded::{BoundedLog, LogKind};
pub use metrics::{InFlightGuard, Metrics};

/// 诊断上下文：由入口构造一次，经 AppState 注入各 handler
pub struct Diagnostics {
    pub info: BoundedLog,
    pub errors: BoundedLog,
    pub metrics: Arc<Metrics>,
    entry_max_chars: usize,
}

impl Diagnostics {
    pub fn new(cfg: &DiagnosticsConfig) -> Self {
        Self {
            info: BoundedLog::new(cfg.info_capacity),
            errors: BoundedLog::new(cfg.error_capacity),
            metrics: Arc::new(Metrics::new()),
            entry_max_chars: cfg.entry_max_chars,
        }
    }

    pub fn log_info(&self, message: impl Into<String>) {
        let message = truncate_chars(message.into(), self.entry_max_chars);
        tracing::info!("{}", message);
        self.info.push(LogKind::Info, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        let message = truncate_chars(message.into(), self.entry_max_chars);
        tracing::error!("{}", message);
        self.errors.push(LogKind::Error, message);
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut cut = s[..idx].to_string();
            cut.push('…');
            cut
        }
        None => s,
    }
}
