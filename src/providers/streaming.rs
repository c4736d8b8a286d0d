use futures_util::StreamExt;
use futures_util::stream;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;

use crate::error::GatewayError;
use crate::providers::openai::client::upstream_error;
use crate::providers::upstream::ResponseEventStream;

async fn classify_stream_error(err: reqwest_eventsource::Error) -> GatewayError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let bytes = response.bytes().await.unwrap_or_default();
            upstream_error(status, &bytes)
        }
        reqwest_eventsource::Error::Transport(e) => GatewayError::Http(e),
        other => GatewayError::Stream(other.to_string()),
    }
}

/// 把 EventSource 转成事件对象流：
/// - 跳过 Open，遇到 `[DONE]` 或流结束即停止
/// - 出错时产出一次 Err 后结束（关闭 EventSource，避免自动重连）
fn into_event_stream(es: EventSource) -> ResponseEventStream {
    stream::unfold(Some(es), |state| async move {
        let Some(mut es) = state else {
            return None;
        };
        loop {
            match es.next().await {
                None => return None,
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(m))) => {
                    if m.data.trim() == "[DONE]" {
                        es.close();
                        return None;
                    }
                    let item = serde_json::from_str::<Value>(&m.data).map_err(GatewayError::Json);
                    return Some((item, Some(es)));
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                    es.close();
                    return None;
                }
                Some(Err(e)) => {
                    es.close();
                    let err = classify_stream_error(e).await;
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}

/// 等到第一条事件（或错误）再返回：握手阶段的上游错误（401/429 等）
/// 可以按普通 HTTP 状态码回给调用方，而不是混进已经开始的事件流里
pub async fn open_response_stream(es: EventSource) -> Result<ResponseEventStream, GatewayError> {
    let mut events = into_event_stream(es);
    match events.next().await {
        None => Ok(stream::empty().boxed()),
        Some(Err(e)) => Err(e),
        Some(Ok(first)) => Ok(stream::once(async move { Ok(first) })
            .chain(events)
            .boxed()),
    }
}
