//! 传输槽位管理
//!
//! 每个对端至多占用一个槽位：进行中的尝试（持有传输句柄），或等待冷却的重试
//! （持有定时器）。槽位表本身就是互斥保证：第二次 `begin_attempt` 会看到已有槽位并失败。
//!
//! # 定时器取消
//!
//! 每次布置重试定时器都会分配新的 generation。取消槽位时会中止定时器任务，
//! 但定时器可能已经把 `RetryDue` 投递进了队列，所以触发时还要核对槽位当前的
//! generation，对不上就忽略，已清除的槽位不会被旧定时器复活。

use crate::error::{Result, TrollError};
use crate::event::TrollEvent;
use crate::peer::PeerId;
use crate::transport::{AttemptId, OperationEvent, PeerTransport, TransferRequest, TransportEvents};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 槽位对外可见的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Active,
    Pending,
}

/// `begin_attempt` 成功后返回的句柄，不暴露底层传输句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    peer: PeerId,
    attempt: AttemptId,
}

impl SlotHandle {
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

enum Slot {
    Active {
        attempt: AttemptId,
    },
    Pending {
        /// 对端拒绝或结束后为 None，定时器仍会照常触发
        attempt: Option<AttemptId>,
        timer: JoinHandle<()>,
        generation: u64,
    },
}

impl Slot {
    fn attempt(&self) -> Option<AttemptId> {
        match self {
            Slot::Active { attempt } => Some(*attempt),
            Slot::Pending { attempt, .. } => *attempt,
        }
    }

    fn state(&self) -> SlotState {
        match self {
            Slot::Active { .. } => SlotState::Active,
            Slot::Pending { .. } => SlotState::Pending,
        }
    }

    fn cancel(self, transport: &dyn PeerTransport) {
        if let Slot::Pending { timer, .. } = &self {
            timer.abort();
        }
        if let Some(attempt) = self.attempt() {
            transport.cancel(attempt);
        }
    }
}

pub struct SlotManager {
    transport: Arc<dyn PeerTransport>,
    events: TransportEvents,
    recharge: Duration,
    slots: HashMap<PeerId, Slot>,
    next_generation: u64,
}

impl SlotManager {
    pub(crate) fn new(
        transport: Arc<dyn PeerTransport>,
        events: TransportEvents,
        recharge: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            recharge,
            slots: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn recharge(&self) -> Duration {
        self.recharge
    }

    /// 只影响之后布置的定时器
    pub fn set_recharge(&mut self, recharge: Duration) {
        self.recharge = recharge;
    }

    pub fn state(&self, peer: PeerId) -> SlotState {
        self.slots.get(&peer).map_or(SlotState::Idle, Slot::state)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 向对端发起一次传输并占用槽位
    pub fn begin_attempt(&mut self, peer: PeerId, request: &TransferRequest) -> Result<SlotHandle> {
        if self.slots.contains_key(&peer) {
            return Err(TrollError::AlreadyActive(peer));
        }

        let attempt = self
            .transport
            .begin_transfer(peer, request, self.events.clone())?;
        debug!("Offering {:?} to {peer} as {attempt}", request.payload);

        self.slots.insert(peer, Slot::Active { attempt });
        Ok(SlotHandle { peer, attempt })
    }

    /// 处理传输层上报的生命周期事件，返回需要交给事件流的通知
    ///
    /// 不属于任何槽位的尝试（已取消或对端已消失）直接忽略。`WaitForAnswer`
    /// 需要在 tokio 运行时内处理才能布置重试定时器。
    pub fn on_lifecycle_event(
        &mut self,
        attempt: AttemptId,
        event: OperationEvent,
    ) -> Vec<TrollEvent> {
        let Some(peer) = self.peer_for(attempt) else {
            trace!("Ignoring {event} for untracked {attempt}");
            return Vec::new();
        };

        let mut out = vec![TrollEvent::Lifecycle { peer, event }];
        match event {
            OperationEvent::AskUser => {
                self.transport.resume(attempt);
            }
            OperationEvent::WaitForAnswer => {
                self.arm_retry(peer, attempt);
            }
            event if event.is_terminal() => {
                self.finish(peer, attempt);
                out.push(TrollEvent::AttemptCompleted { peer, event });
            }
            _ => {}
        }
        out
    }

    /// 定时器触发：槽位仍由该 generation 占用时撤回请求并清空，返回 true
    pub(crate) fn fire_retry(&mut self, peer: PeerId, generation: u64) -> bool {
        match self.slots.get(&peer) {
            Some(Slot::Pending { generation: g, .. }) if *g == generation => {}
            _ => {
                trace!("Stale retry timer for {peer} (generation {generation})");
                return false;
            }
        }

        if let Some(slot) = self.slots.remove(&peer) {
            slot.cancel(self.transport.as_ref());
        }
        debug!("Recharge elapsed for {peer}, offer withdrawn");
        true
    }

    /// 取消单个对端的槽位
    pub fn cancel_for(&mut self, peer: PeerId) -> bool {
        match self.slots.remove(&peer) {
            Some(slot) => {
                debug!("Cancelling {:?} slot for {peer}", slot.state());
                slot.cancel(self.transport.as_ref());
                true
            }
            None => false,
        }
    }

    /// 取消全部槽位，返回取消的数量
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        for (peer, slot) in self.slots.drain() {
            trace!("Cancelling {:?} slot for {peer}", slot.state());
            slot.cancel(self.transport.as_ref());
        }
        if count > 0 {
            debug!("Cancelled {count} outstanding slot(s)");
        }
        count
    }

    fn peer_for(&self, attempt: AttemptId) -> Option<PeerId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.attempt() == Some(attempt))
            .map(|(peer, _)| *peer)
    }

    fn arm_retry(&mut self, peer: PeerId, attempt: AttemptId) {
        if !matches!(self.slots.get(&peer), Some(Slot::Active { attempt: a }) if *a == attempt) {
            trace!("{peer} is already recharging, ignoring repeated WaitForAnswer");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, {peer} stays active without a retry timer");
            return;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let recharge = self.recharge;
        let events = self.events.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(recharge).await;
            events.retry_due(peer, generation);
        });

        debug!("{peer} is showing the offer, retrying in {recharge:?}");
        self.slots.insert(
            peer,
            Slot::Pending {
                attempt: Some(attempt),
                timer,
                generation,
            },
        );
    }

    fn finish(&mut self, peer: PeerId, attempt: AttemptId) {
        match self.state(peer) {
            SlotState::Active => {
                self.slots.remove(&peer);
                debug!("{attempt} for {peer} finished, slot is idle");
            }
            SlotState::Pending => {
                // 冷却中的请求被对端处理了，等定时器照常触发
                if let Some(Slot::Pending { attempt: pending, .. }) = self.slots.get_mut(&peer) {
                    *pending = None;
                }
                debug!("{attempt} for {peer} ended while recharging");
            }
            SlotState::Idle => {}
        }
    }
}

impl Drop for SlotManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
