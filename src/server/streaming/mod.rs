use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::logging::{Diagnostics, InFlightGuard};
use crate::providers::ResponseEventStream;
use crate::providers::openai::TokenUsage;
use crate::server::request_logging::{record_failure, record_success};

const CHANNEL_CAPACITY: usize = 32;

/// 流式调用的上下文：并发 guard 随转发任务一起存活到流结束
pub struct StreamContext {
    pub diagnostics: Arc<Diagnostics>,
    pub label: &'static str,
    pub request: Value,
    pub started: Instant,
    pub in_flight: InFlightGuard,
}

// event 名取自事件的 type 字段；含换行等非法字符时不带 event 名
fn to_sse_event(event: &Value) -> Event {
    let sse = Event::default().data(event.to_string());
    match event.get("type").and_then(Value::as_str) {
        Some(name) if !name.is_empty() && !name.contains(['\n', '\r']) => sse.event(name),
        _ => sse,
    }
}

fn error_event(err: &GatewayError) -> Event {
    let error = match err {
        GatewayError::Upstream { body, .. } => body.get("error").cloned().unwrap_or_else(|| body.clone()),
        _ => json!({ "message": "Internal Server Error" }),
    };
    Event::default()
        .event("error")
        .data(json!({ "error": error }).to_string())
}

/// 上游事件流 -> SSE。转发任务在客户端断开（接收端被丢弃）后立即停止读取上游；
/// 正常结束和出错都以 `data: [DONE]` 收尾。
pub fn relay_response_events(ctx: StreamContext, mut events: ResponseEventStream) -> Response {
    let (tx, rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let StreamContext {
            diagnostics,
            label,
            request,
            started,
            in_flight,
        } = ctx;
        let mut usage = None;
        let mut forwarded = 0usize;
        let mut failure = None;
        let mut client_gone = false;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    client_gone = true;
                    break;
                }
                next = events.next() => next,
            };
            match next {
                None => break,
                Some(Ok(event)) => {
                    if let Some(u) = TokenUsage::from_response_event(&event) {
                        usage = Some(u);
                    }
                    if tx.send(to_sse_event(&event)).await.is_err() {
                        client_gone = true;
                        break;
                    }
                    forwarded += 1;
                }
                Some(Err(e)) => {
                    let _ = tx.send(error_event(&e)).await;
                    failure = Some(e);
                    break;
                }
            }
        }
        // 提前释放上游连接
        drop(events);

        if !client_gone {
            let _ = tx.send(Event::default().data("[DONE]")).await;
        }
        diagnostics.metrics.record_request(started.elapsed());
        drop(in_flight);

        match failure {
            Some(err) => record_failure(&diagnostics, label, &err),
            None => {
                let status = if client_gone { "client disconnected" } else { "completed" };
                record_success(
                    &diagnostics,
                    label,
                    &request,
                    &json!({ "stream": status, "events": forwarded }),
                    usage,
                );
            }
        }
    });

    let out = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(out).keep_alive(KeepAlive::default()).into_response()
}
