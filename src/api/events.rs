//! 实时事件流
//!
//! GET /events，无需认证。连接建立后先推送当前统计与主机列表，
//! 然后转发事件中心的所有事件，服务关闭时结束

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::domain::event::Event;
use crate::services::events::snapshot_events;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(stream_events))
}

fn to_sse(event: &Event) -> SseEvent {
    let json = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().data(json)
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    // 先订阅再读快照，避免漏掉中间发布的事件
    let mut subscription = state.events.subscribe();
    let shutdown = state.shutdown.clone();

    let initial = match snapshot_events(state.hosts.as_ref()).await {
        Ok(events) => events.to_vec(),
        Err(e) => {
            warn!(error = %e, "Failed to read initial snapshot");
            Vec::new()
        }
    };

    debug!(subscribers = state.events.subscriber_count(), "Event subscriber attached");

    let stream = async_stream::stream! {
        for event in &initial {
            yield Ok(to_sse(event));
        }

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                event = subscription.next() => event,
            };
            let Some(event) = next else {
                break;
            };
            yield Ok(to_sse(&event));
        }

        debug!(dropped = subscription.dropped(), "Event subscriber detached");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
