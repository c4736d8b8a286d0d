use std::fmt::Write as _;

use super::bounded::LogEntry;
use super::metrics::MetricsSnapshot;
use super::time::to_iso8601_utc_string;

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// 诊断页：先渲染计数器，再按最新在前渲染日志条目
pub fn render_report(title: &str, metrics: &MetricsSnapshot, entries: &[LogEntry]) -> String {
    let mut body = String::new();
    let _ = write!(body, "<h1>{}</h1>", escape_html(title));

    body.push_str("<ul>");
    let last_access = metrics
        .last_diagnostic_access
        .as_ref()
        .map(to_iso8601_utc_string)
        .unwrap_or_else(|| "-".to_string());
    let rows: [(&str, String); 10] = [
        ("Requests", metrics.request_count.to_string()),
        ("Average request time (ms)", metrics.average_request_ms().to_string()),
        ("Max request time (ms)", metrics.max_request_ms.to_string()),
        ("Parallel requests", metrics.current_parallel_requests.to_string()),
        ("Max parallel requests", metrics.max_parallel_requests.to_string()),
        ("Max prompt tokens", metrics.max_prompt_tokens.to_string()),
        ("Max cached tokens", metrics.max_cached_tokens.to_string()),
        ("Max completion tokens", metrics.max_completion_tokens.to_string()),
        ("Errors", metrics.error_count.to_string()),
        ("Last diagnostics access", last_access),
    ];
    for (label, value) in rows {
        let _ = write!(body, "<li>{}: {}</li>", label, escape_html(&value));
    }
    body.push_str("</ul>");

    if entries.is_empty() {
        body.push_str("<p>(empty)</p>");
    }
    for entry in entries {
        let _ = write!(
            body,
            "<p>{} [{}] {}</p>",
            to_iso8601_utc_string(&entry.timestamp),
            entry.kind.as_str(),
            escape_html(&entry.message)
        );
    }

    format!("<html><body>{}</body></html>", body)
}
