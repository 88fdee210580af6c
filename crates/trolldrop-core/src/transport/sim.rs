//! 进程内模拟传输
//!
//! 记录所有调用，由调用方手动推送发现快照和生命周期事件；也可以配置一段
//! 自动应答脚本，让每次新的传输尝试按脚本依次收到事件。

use super::{
    AttemptId, OperationEvent, PeerTransport, SubscriptionId, TransferRequest, TransportEvents,
};
use crate::error::{Result, TrollError};
use crate::peer::{PeerDescriptor, PeerId};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// 模拟传输收到的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    OpenRoot(SubscriptionId),
    BeginTransfer { peer: PeerId, attempt: AttemptId },
    Cancel(AttemptId),
    Resume(AttemptId),
    Invalidate(SubscriptionId),
}

struct SimAttempt {
    peer: PeerId,
    events: TransportEvents,
    responder: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SimState {
    next_id: u64,
    root: Option<(SubscriptionId, TransportEvents)>,
    attempts: HashMap<AttemptId, SimAttempt>,
    failing: HashSet<PeerId>,
    calls: Vec<SimCall>,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct SimTransport {
    available: bool,
    script: Vec<(Duration, OperationEvent)>,
    state: Mutex<SimState>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            available: true,
            script: Vec::new(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// 无法打开发现的传输，用于模拟能力绑定失败
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// 每次新的传输尝试都会按脚本（相对上一步的延迟）依次收到事件
    pub fn with_script(mut self, script: Vec<(Duration, OperationEvent)>) -> Self {
        self.script = script;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 推送一次完整的发现快照，没有打开的订阅时返回 false
    pub fn announce(&self, children: Vec<PeerDescriptor>) -> bool {
        let root = self.state().root.clone();
        match root {
            Some((subscription, events)) => events.children_changed(subscription, children),
            None => false,
        }
    }

    /// 为某次尝试推送生命周期事件，尝试未知时返回 false
    pub fn emit(&self, attempt: AttemptId, event: OperationEvent) -> bool {
        let events = self.state().attempts.get(&attempt).map(|a| a.events.clone());
        match events {
            Some(events) => events.lifecycle(attempt, event, serde_json::Value::Null),
            None => false,
        }
    }

    /// 让之后发往 `peer` 的传输请求直接失败（或恢复正常）
    pub fn fail_transfers_to(&self, peer: PeerId, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(peer);
        } else {
            state.failing.remove(&peer);
        }
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state().calls.clone()
    }

    /// 按顺序列出所有被发起传输的对端
    pub fn transfers(&self) -> Vec<PeerId> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimCall::BeginTransfer { peer, .. } => Some(*peer),
                _ => None,
            })
            .collect()
    }

    pub fn transfers_to(&self, peer: PeerId) -> usize {
        self.transfers().into_iter().filter(|p| *p == peer).count()
    }

    /// 该对端最近一次传输尝试
    pub fn last_attempt(&self, peer: PeerId) -> Option<AttemptId> {
        self.state().calls.iter().rev().find_map(|call| match call {
            SimCall::BeginTransfer { peer: p, attempt } if *p == peer => Some(*attempt),
            _ => None,
        })
    }

    pub fn was_cancelled(&self, attempt: AttemptId) -> bool {
        self.state().calls.contains(&SimCall::Cancel(attempt))
    }

    pub fn was_resumed(&self, attempt: AttemptId) -> bool {
        self.state().calls.contains(&SimCall::Resume(attempt))
    }

    pub fn is_discovering(&self) -> bool {
        self.state().root.is_some()
    }

    fn spawn_responder(&self, attempt: AttemptId, events: TransportEvents) -> Option<JoinHandle<()>> {
        if self.script.is_empty() {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, scripted responses for {attempt} are disabled");
            return None;
        };
        let script = self.script.clone();
        Some(runtime.spawn(async move {
            for (delay, event) in script {
                tokio::time::sleep(delay).await;
                if !events.lifecycle(attempt, event, serde_json::Value::Null) {
                    break;
                }
            }
        }))
    }
}

impl PeerTransport for SimTransport {
    fn open_root(&self, events: TransportEvents) -> Result<SubscriptionId> {
        if !self.available {
            return Err(TrollError::TransportUnavailable(
                "simulated transport is unavailable".to_string(),
            ));
        }
        let mut state = self.state();
        let subscription = SubscriptionId::new(state.next_id());
        state.root = Some((subscription, events));
        state.calls.push(SimCall::OpenRoot(subscription));
        Ok(subscription)
    }

    fn begin_transfer(
        &self,
        peer: PeerId,
        request: &TransferRequest,
        events: TransportEvents,
    ) -> Result<AttemptId> {
        let attempt = {
            let mut state = self.state();
            if state.failing.contains(&peer) {
                return Err(TrollError::Transfer {
                    peer,
                    reason: "simulated transfer failure".to_string(),
                });
            }
            AttemptId::new(state.next_id())
        };
        debug!(
            "Simulated offer {attempt} of {:?} to {peer}",
            request.payload
        );
        let responder = self.spawn_responder(attempt, events.clone());

        let mut state = self.state();
        state.attempts.insert(
            attempt,
            SimAttempt {
                peer,
                events,
                responder,
            },
        );
        state.calls.push(SimCall::BeginTransfer { peer, attempt });
        Ok(attempt)
    }

    fn cancel(&self, attempt: AttemptId) {
        let mut state = self.state();
        if let Some(sim) = state.attempts.remove(&attempt) {
            debug!("Simulated cancel of {attempt} for {}", sim.peer);
            if let Some(responder) = sim.responder {
                responder.abort();
            }
        }
        state.calls.push(SimCall::Cancel(attempt));
    }

    fn resume(&self, attempt: AttemptId) {
        self.state().calls.push(SimCall::Resume(attempt));
    }

    fn invalidate(&self, subscription: SubscriptionId) {
        let mut state = self.state();
        if state.root.as_ref().is_some_and(|(id, _)| *id == subscription) {
            state.root = None;
        }
        state.calls.push(SimCall::Invalidate(subscription));
    }
}
