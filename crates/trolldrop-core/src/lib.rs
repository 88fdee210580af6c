//! Trolldrop Core Library
//!
//! 发现附近的对端设备，并按可配置的节奏向选中的对端反复发起文件传输请求，
//! 直到停止。
//!
//! # 模块
//!
//! - **peer** / **registry**: 对端模型和发现快照的增减计算
//! - **slots**: 每个对端至多一个进行中的尝试或待触发的重试
//! - **controller**: 发现/活动状态机，把传输事件翻译成槽位操作
//! - **service**: 串行执行上下文和可克隆的句柄
//! - **transport**: 注入的传输能力 trait 以及进程内模拟实现
//!
//! # 使用示例
//!
//! ```ignore
//! use trolldrop_core::{ChannelSink, SimTransport, TrollController, TrollService};
//!
//! // 1. 用已绑定的传输能力创建控制器
//! let transport = Arc::new(SimTransport::new());
//! let controller = TrollController::new(transport, "trollface.png", Duration::from_millis(500));
//!
//! // 2. 在串行服务循环中运行
//! let (handle, _task) = TrollService::spawn(controller);
//! handle.start_discovery().await?;
//!
//! // 3. 对选中的对端开始活动
//! let (sink, mut events) = ChannelSink::new();
//! handle.start_campaign(|peer| peer.label() == "Alice", Arc::new(sink)).await?;
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod logging;
pub mod peer;
pub mod registry;
pub mod service;
pub mod slots;
pub mod transport;

pub use config::{DEFAULT_RECHARGE, MAX_RECHARGE, TrollSettings};
pub use controller::{ControllerState, TrollController};
pub use error::{Result, TrollError};
pub use event::{ChannelSink, EventSink, TrollEvent};
pub use logging::LogLevel;
pub use peer::{Peer, PeerDescriptor, PeerId};
pub use registry::{PeerRegistry, PeerSetDelta};
pub use service::{PeerFilter, TrollHandle, TrollService};
pub use slots::{SlotHandle, SlotManager, SlotState};
pub use transport::{
    AttemptId, OperationEvent, PeerTransport, SimCall, SimTransport, SubscriptionId,
    TransferRequest, TransportEvent, TransportEvents,
};
