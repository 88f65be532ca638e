//! 事件中心
//!
//! 两条有界广播通道向所有在线订阅者扇出事件：
//! - 生命周期通道：`deployment` 事件
//! - 快照通道：周期性的 `stats` / `hosts` 事件
//!
//! 每条通道每个订阅者最多积压 `EVENT_CHANNEL_CAPACITY` 条，落后时丢弃最旧的事件。
//! 快照再多也不会挤掉部署事件，订阅者优先读取生命周期通道

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::env::constants::EVENT_CHANNEL_CAPACITY;
use crate::domain::event::Event;

/// 事件中心
pub struct EventHub {
    lifecycle: broadcast::Sender<Event>,
    snapshots: broadcast::Sender<Event>,
}

impl EventHub {
    /// 创建新的事件中心
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// 使用自定义容量创建
    pub fn with_capacity(capacity: usize) -> Self {
        let (lifecycle, _) = broadcast::channel(capacity.max(1));
        let (snapshots, _) = broadcast::channel(capacity.max(1));
        Self {
            lifecycle,
            snapshots,
        }
    }

    /// 订阅事件
    ///
    /// 只会收到订阅之后发布的事件
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            lifecycle: self.lifecycle.subscribe(),
            snapshots: self.snapshots.subscribe(),
            dropped: 0,
        }
    }

    /// 发布事件，返回收到事件的订阅者数量
    ///
    /// 没有订阅者时事件直接丢弃
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let sender = match &event {
            Event::Deployment(_) => &self.lifecycle,
            Event::Stats(_) | Event::Hosts(_) => &self.snapshots,
        };
        match sender.send(event) {
            Ok(receivers) => {
                debug!(kind, receivers, "Published event");
                receivers
            }
            Err(_) => 0,
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.lifecycle.receiver_count()
    }

    /// 是否有订阅者
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// 事件订阅
pub struct EventSubscription {
    lifecycle: broadcast::Receiver<Event>,
    snapshots: broadcast::Receiver<Event>,
    /// 因落后被丢弃的事件数
    dropped: u64,
}

impl EventSubscription {
    /// 等待下一个事件
    ///
    /// 两条通道都有事件时先返回部署事件。
    /// 订阅者落后时跳过被覆盖的事件继续接收；事件中心销毁后返回 None
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            let received = tokio::select! {
                biased;
                received = self.lifecycle.recv() => received,
                received = self.snapshots.recv() => received,
            };
            match received {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "Event subscriber lagged, skipping events");
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 累计丢弃的事件数
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
