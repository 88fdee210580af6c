//! 对端传输服务能力
//!
//! 控制器只依赖 [`PeerTransport`] trait，具体的发现/传输实现（以及如何加载它）
//! 在构造时注入。所有调用立即返回，结果通过 [`TransportEvents`] 异步送回控制器的
//! 串行事件队列。

pub mod sim;

use crate::error::Result;
use crate::peer::{PeerDescriptor, PeerId};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub use sim::{SimCall, SimTransport};

/// 一次传输尝试的不透明句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

impl AttemptId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt#{}", self.0)
    }
}

/// 发现订阅句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription#{}", self.0)
    }
}

/// 传输生命周期事件
///
/// 顺序与底层服务的原始编号一致（`Unknown = 0` ... `Blocked = 14`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationEvent {
    Unknown = 0,
    NewOperation = 1,
    AskUser = 2,
    WaitForAnswer = 3,
    Canceled = 4,
    Started = 5,
    Preprocess = 6,
    Progress = 7,
    Postprocess = 8,
    Finished = 9,
    ErrorOccurred = 10,
    Connecting = 11,
    Information = 12,
    Conflict = 13,
    Blocked = 14,
}

impl OperationEvent {
    /// 从原始事件编号创建
    pub fn from_raw(raw: i64) -> Option<Self> {
        let event = match raw {
            0 => Self::Unknown,
            1 => Self::NewOperation,
            2 => Self::AskUser,
            3 => Self::WaitForAnswer,
            4 => Self::Canceled,
            5 => Self::Started,
            6 => Self::Preprocess,
            7 => Self::Progress,
            8 => Self::Postprocess,
            9 => Self::Finished,
            10 => Self::ErrorOccurred,
            11 => Self::Connecting,
            12 => Self::Information,
            13 => Self::Conflict,
            14 => Self::Blocked,
            _ => return None,
        };
        Some(event)
    }

    pub fn raw(self) -> i64 {
        self as i64
    }

    /// 终止事件：尝试结束，槽位回到空闲
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Finished | Self::Blocked | Self::ErrorOccurred
        )
    }
}

impl fmt::Display for OperationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 传输层推送给控制器的通知
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// 根节点的子节点集合发生变化（完整快照）
    ///
    /// 控制器只接受来自当前订阅的快照。
    ChildrenChanged {
        subscription: SubscriptionId,
        children: Vec<PeerDescriptor>,
    },
    /// 某次传输尝试的生命周期事件
    Lifecycle {
        attempt: AttemptId,
        event: OperationEvent,
        properties: serde_json::Value,
    },
}

/// 控制器串行队列上的输入
#[derive(Debug)]
pub(crate) enum ControllerInput {
    Transport(TransportEvent),
    RetryDue { peer: PeerId, generation: u64 },
}

/// 传输层用来回送通知的发送端
///
/// 发送永不阻塞；控制器已销毁时通知被丢弃。
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<ControllerInput>,
}

impl TransportEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ControllerInput>) -> Self {
        Self { tx }
    }

    /// 推送 `subscription` 的一次完整发现快照，返回控制器是否仍在接收
    pub fn children_changed(
        &self,
        subscription: SubscriptionId,
        children: Vec<PeerDescriptor>,
    ) -> bool {
        self.send(TransportEvent::ChildrenChanged {
            subscription,
            children,
        })
    }

    pub fn lifecycle(
        &self,
        attempt: AttemptId,
        event: OperationEvent,
        properties: serde_json::Value,
    ) -> bool {
        self.send(TransportEvent::Lifecycle {
            attempt,
            event,
            properties,
        })
    }

    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(ControllerInput::Transport(event)).is_ok()
    }

    pub(crate) fn retry_due(&self, peer: PeerId, generation: u64) -> bool {
        self.tx
            .send(ControllerInput::RetryDue { peer, generation })
            .is_ok()
    }
}

/// 一次传输要提供的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// 本地文件路径
    pub payload: PathBuf,
    /// 预览图（payload 本身是图片时使用）
    pub preview: Option<PathBuf>,
}

impl TransferRequest {
    pub fn new(payload: impl Into<PathBuf>) -> Self {
        let payload = payload.into();
        let preview = is_image(&payload).then(|| payload.clone());
        Self { payload, preview }
    }
}

fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE)
}

/// 对端传输服务
///
/// 实现方负责无线协议本身；所有方法必须立即返回，结果通过 `events` 异步送达。
pub trait PeerTransport: Send + Sync {
    /// 打开根发现节点，之后通过 `events` 推送带有返回的订阅句柄的 `ChildrenChanged`
    ///
    /// 每次调用都必须返回新的句柄。
    fn open_root(&self, events: TransportEvents) -> Result<SubscriptionId>;

    /// 向对端发起一次传输，之后通过 `events` 推送生命周期事件
    fn begin_transfer(
        &self,
        peer: PeerId,
        request: &TransferRequest,
        events: TransportEvents,
    ) -> Result<AttemptId>;

    fn cancel(&self, attempt: AttemptId);

    fn resume(&self, attempt: AttemptId);

    /// 结束发现
    fn invalidate(&self, subscription: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_mapping() {
        for raw in 0..=14 {
            let event = OperationEvent::from_raw(raw).unwrap();
            assert_eq!(event.raw(), raw);
        }
        assert_eq!(OperationEvent::from_raw(3), Some(OperationEvent::WaitForAnswer));
        assert_eq!(OperationEvent::from_raw(15), None);
        assert_eq!(OperationEvent::from_raw(-1), None);
    }

    #[test]
    fn test_terminal_events() {
        assert!(OperationEvent::Canceled.is_terminal());
        assert!(OperationEvent::Finished.is_terminal());
        assert!(OperationEvent::Blocked.is_terminal());
        assert!(OperationEvent::ErrorOccurred.is_terminal());
        assert!(!OperationEvent::WaitForAnswer.is_terminal());
        assert!(!OperationEvent::Progress.is_terminal());
    }

    #[test]
    fn test_preview_only_for_images() {
        let request = TransferRequest::new("/tmp/trollface.png");
        assert_eq!(request.preview, Some(PathBuf::from("/tmp/trollface.png")));

        let request = TransferRequest::new("/tmp/notes.txt");
        assert_eq!(request.preview, None);
    }
}
