//! 对端注册表
//!
//! 保存最近一次发现快照，并计算新旧快照之间的增减。

use crate::peer::{Peer, PeerDescriptor, PeerId};
use std::collections::{HashMap, HashSet};

/// 一次快照带来的对端集合变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSetDelta {
    pub added: HashSet<PeerId>,
    pub removed: HashSet<PeerId>,
}

impl PeerSetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用完整快照替换已知集合，返回增减
    ///
    /// 只按 `PeerId` 比较；名称会被刷新但不参与增减计算。
    pub fn apply_snapshot(&mut self, children: &[PeerDescriptor]) -> PeerSetDelta {
        let next: HashMap<PeerId, Peer> = children
            .iter()
            .map(|desc| (desc.id, Peer::from(desc)))
            .collect();

        let added = next
            .keys()
            .filter(|id| !self.peers.contains_key(id))
            .copied()
            .collect();
        let removed = self
            .peers
            .keys()
            .filter(|id| !next.contains_key(id))
            .copied()
            .collect();

        self.peers = next;
        PeerSetDelta { added, removed }
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// 当前对端的只读快照，按标签和 id 排序便于展示
    pub fn current_peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.label().cmp(b.label()).then(a.id.cmp(&b.id)));
        peers
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
