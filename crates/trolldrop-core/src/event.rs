//! 活动事件流
//!
//! 控制器把生命周期事件归一化后交给调用方提供的 [`EventSink`]，供 UI 计数。

use crate::peer::PeerId;
use crate::transport::OperationEvent;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrollEvent {
    /// 原样转发的生命周期事件
    Lifecycle { peer: PeerId, event: OperationEvent },
    /// 尝试进入终止状态
    AttemptCompleted { peer: PeerId, event: OperationEvent },
    /// 冷却结束，撤回了对端屏幕上的请求
    Cancelled { peer: PeerId },
}

impl TrollEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Lifecycle { peer, .. }
            | Self::AttemptCompleted { peer, .. }
            | Self::Cancelled { peer } => *peer,
        }
    }

    /// 是否计入"已发送"计数
    pub fn counts_as_sent(&self) -> bool {
        match self {
            Self::AttemptCompleted { event, .. } => matches!(
                event,
                OperationEvent::Canceled | OperationEvent::Finished | OperationEvent::Blocked
            ),
            Self::Cancelled { .. } => true,
            Self::Lifecycle { .. } => false,
        }
    }
}

/// 活动事件接收方
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: TrollEvent);
}

impl<F> EventSink for F
where
    F: Fn(TrollEvent) + Send + Sync,
{
    fn on_event(&self, event: TrollEvent) {
        self(event);
    }
}

/// 把事件转发到 channel 的接收方
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TrollEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrollEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: TrollEvent) {
        let _ = self.tx.send(event);
    }
}
