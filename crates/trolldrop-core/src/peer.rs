//! 对端设备模型
//!
//! 对端只由传输层分配的 [`PeerId`] 标识，名称只是尽力解析的展示信息。

use std::fmt;

/// 传输层分配的不透明对端标识，在对端可见期间保持稳定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// 传输层上报的子节点描述
///
/// 名称字段按优先级排列：显示名 > 计算机名 > 次要名称。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub display_name: Option<String>,
    pub computer_name: Option<String>,
    pub secondary_name: Option<String>,
}

impl PeerDescriptor {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_computer_name(mut self, name: impl Into<String>) -> Self {
        self.computer_name = Some(name.into());
        self
    }

    pub fn with_secondary_name(mut self, name: impl Into<String>) -> Self {
        self.secondary_name = Some(name.into());
        self
    }

    /// 按优先级解析展示名称，空字符串视为缺失
    pub fn resolve_name(&self) -> Option<String> {
        [&self.display_name, &self.computer_name, &self.secondary_name]
            .into_iter()
            .flatten()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .map(str::to_string)
    }
}

/// 已发现的对端
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: Option<String>,
}

impl Peer {
    /// UI 标签，名称缺失时显示 "Unknown"
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown")
    }
}

impl From<&PeerDescriptor> for Peer {
    fn from(desc: &PeerDescriptor) -> Self {
        Self {
            id: desc.id,
            display_name: desc.resolve_name(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_priority() {
        let desc = PeerDescriptor::new(PeerId::new(1))
            .with_computer_name("MacBook")
            .with_secondary_name("Secondary");
        assert_eq!(desc.resolve_name().as_deref(), Some("MacBook"));

        let desc = desc.with_display_name("Alice's iPhone");
        assert_eq!(desc.resolve_name().as_deref(), Some("Alice's iPhone"));
    }

    #[test]
    fn test_blank_names_fall_through() {
        let desc = PeerDescriptor::new(PeerId::new(2))
            .with_display_name("  ")
            .with_secondary_name("iPad");
        assert_eq!(desc.resolve_name().as_deref(), Some("iPad"));

        let peer = Peer::from(&PeerDescriptor::new(PeerId::new(3)));
        assert_eq!(peer.display_name, None);
        assert_eq!(peer.label(), "Unknown");
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId::new(42).to_string(), "peer#42");
    }
}
