//! 错误类型

use crate::peer::PeerId;

/// 控制器可能返回的错误
#[derive(Debug, thiserror::Error)]
pub enum TrollError {
    /// 传输服务能力无法获取，控制器无法离开 idle 状态
    #[error("peer transport unavailable: {0}")]
    TransportUnavailable(String),

    /// 该对端已有进行中的尝试或待触发的重试
    #[error("{0} already has an outstanding attempt")]
    AlreadyActive(PeerId),

    /// 事件或定时器指向已不在注册表中的对端
    #[error("{0} is no longer visible")]
    PeerVanished(PeerId),

    /// 启动活动时没有任何对端满足筛选条件
    #[error("no eligible peers selected")]
    NoEligiblePeers,

    /// 尚未开始发现就尝试启动活动
    #[error("discovery is not running")]
    NotDiscovering,

    /// 传输服务拒绝发起传输
    #[error("transfer to {peer} could not be started: {reason}")]
    Transfer { peer: PeerId, reason: String },

    /// 服务循环已退出
    #[error("troll service has shut down")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, TrollError>;
