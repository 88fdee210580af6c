//! 控制器
//!
//! 组合注册表和槽位管理器，负责发现与活动的启停，把传输层事件翻译成槽位
//! 操作和面向 UI 的事件流。
//!
//! 控制器本身不加锁：所有输入（命令、发现快照、生命周期事件、定时器触发）都在
//! 同一个串行上下文里处理，见 [`crate::service`]。测试中也可以直接调用方法并用
//! [`TrollController::pump`] 处理已排队的输入。

use crate::config;
use crate::error::{Result, TrollError};
use crate::event::{EventSink, TrollEvent};
use crate::peer::{Peer, PeerDescriptor, PeerId};
use crate::registry::{PeerRegistry, PeerSetDelta};
use crate::slots::{SlotManager, SlotState};
use crate::transport::{
    ControllerInput, PeerTransport, SubscriptionId, TransferRequest, TransportEvent,
    TransportEvents,
};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Discovering,
    Campaigning,
}

struct Campaign {
    request: TransferRequest,
    sink: Arc<dyn EventSink>,
}

pub struct TrollController {
    transport: Arc<dyn PeerTransport>,
    events: TransportEvents,
    inbox: mpsc::UnboundedReceiver<ControllerInput>,
    registry: PeerRegistry,
    slots: SlotManager,
    subscription: Option<SubscriptionId>,
    campaign: Option<Campaign>,
    payload: PathBuf,
    peers_tx: watch::Sender<Vec<Peer>>,
    running_tx: watch::Sender<bool>,
}

impl TrollController {
    /// 创建控制器
    ///
    /// `transport` 是构造前已经绑定好的传输能力。
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        payload: impl Into<PathBuf>,
        recharge: Duration,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let events = TransportEvents::new(tx);
        let recharge = config::clamp_recharge(recharge);
        let slots = SlotManager::new(transport.clone(), events.clone(), recharge);
        let (peers_tx, _) = watch::channel(Vec::new());
        let (running_tx, _) = watch::channel(false);

        Self {
            transport,
            events,
            inbox,
            registry: PeerRegistry::new(),
            slots,
            subscription: None,
            campaign: None,
            payload: payload.into(),
            peers_tx,
            running_tx,
        }
    }

    pub fn state(&self) -> ControllerState {
        match (&self.subscription, &self.campaign) {
            (None, _) => ControllerState::Idle,
            (Some(_), None) => ControllerState::Discovering,
            (Some(_), Some(_)) => ControllerState::Campaigning,
        }
    }

    pub fn is_running(&self) -> bool {
        self.campaign.is_some()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.current_peers()
    }

    /// 订阅对端列表变化
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<Peer>> {
        self.peers_tx.subscribe()
    }

    /// 订阅活动运行状态
    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    pub fn slot_state(&self, peer: PeerId) -> SlotState {
        self.slots.state(peer)
    }

    pub fn recharge_duration(&self) -> Duration {
        self.slots.recharge()
    }

    /// 更新冷却时长，超出上限时截断，返回实际生效的值
    ///
    /// 已经布置的定时器不受影响。
    pub fn set_recharge_duration(&mut self, recharge: Duration) -> Duration {
        let clamped = config::clamp_recharge(recharge);
        if clamped != recharge {
            warn!("Recharge {recharge:?} is out of range, using {clamped:?}");
        }
        self.slots.set_recharge(clamped);
        clamped
    }

    pub fn payload(&self) -> &Path {
        &self.payload
    }

    /// 设置下一次活动使用的文件，不影响正在运行的活动
    pub fn set_payload(&mut self, payload: impl Into<PathBuf>) {
        self.payload = payload.into();
    }

    /// 打开根发现节点，已在发现时什么都不做
    pub fn start_discovery(&mut self) -> Result<()> {
        if self.subscription.is_some() {
            return Ok(());
        }

        let subscription = self
            .transport
            .open_root(self.events.clone())
            .map_err(|e| match e {
                TrollError::TransportUnavailable(_) => e,
                other => TrollError::TransportUnavailable(other.to_string()),
            })?;
        self.subscription = Some(subscription);
        info!("Discovery started");
        Ok(())
    }

    /// 停止活动、清空对端并结束发现
    ///
    /// 返回前所有进行中的尝试和定时器都已取消。
    pub fn stop_discovery(&mut self) {
        self.stop_campaign();
        self.registry.clear();
        self.publish_peers();

        if let Some(subscription) = self.subscription.take() {
            self.transport.invalidate(subscription);
            info!("Discovery stopped");
        }
    }

    /// 对满足 `should_troll` 的当前对端开始活动，返回发起的尝试数
    ///
    /// 之后才出现的对端不会被加入本次活动。活动已在运行时返回 `Ok(0)`；
    /// 所有选中对端都发起失败时返回最后一个错误，活动不会启动。
    pub fn start_campaign(
        &mut self,
        should_troll: &dyn Fn(&Peer) -> bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<usize> {
        if self.campaign.is_some() {
            debug!("Campaign already running");
            return Ok(0);
        }
        if self.subscription.is_none() {
            return Err(TrollError::NotDiscovering);
        }

        let targets: Vec<PeerId> = self
            .registry
            .current_peers()
            .into_iter()
            .filter(|peer| should_troll(peer))
            .map(|peer| peer.id)
            .collect();
        if targets.is_empty() {
            return Err(TrollError::NoEligiblePeers);
        }

        let request = TransferRequest::new(self.payload.clone());
        info!(
            "Starting campaign: {} peer(s), payload {:?}, recharge {:?}",
            targets.len(),
            request.payload,
            self.slots.recharge()
        );

        let mut started = 0;
        let mut last_error = None;
        for peer in targets {
            match self.slots.begin_attempt(peer, &request) {
                Ok(_) => started += 1,
                Err(e) => {
                    warn!("Could not troll {peer}: {e}");
                    last_error = Some(e);
                }
            }
        }
        if let (0, Some(e)) = (started, last_error) {
            return Err(e);
        }

        self.campaign = Some(Campaign { request, sink });
        self.running_tx.send_replace(true);
        Ok(started)
    }

    /// 停止活动并无条件取消所有槽位
    pub fn stop_campaign(&mut self) {
        if self.campaign.take().is_some() {
            info!("Campaign stopped");
        }
        self.slots.cancel_all();
        self.running_tx.send_replace(false);
    }

    /// 应用一次发现快照
    ///
    /// 消失的对端会被取消槽位；新出现的对端不会自动加入活动。
    pub fn on_discovery_notification(&mut self, children: &[PeerDescriptor]) -> PeerSetDelta {
        let delta = self.registry.apply_snapshot(children);
        for peer in &delta.removed {
            if self.slots.cancel_for(*peer) {
                debug!("{peer} disappeared, slot cancelled");
            }
        }
        if !delta.is_empty() {
            debug!(
                "Peers changed: +{} -{} (now {})",
                delta.added.len(),
                delta.removed.len(),
                self.registry.len()
            );
        }
        self.publish_peers();
        delta
    }

    /// 处理所有已排队的输入而不等待，返回处理的数量
    ///
    /// 重试定时器需要 tokio 运行时，在运行时之外调用时对端停留在进行中状态。
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.inbox.try_recv() {
            self.handle_input(input);
            handled += 1;
        }
        handled
    }

    pub(crate) async fn next_input(&mut self) -> Option<ControllerInput> {
        self.inbox.recv().await
    }

    pub(crate) fn handle_input(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Transport(TransportEvent::ChildrenChanged {
                subscription,
                children,
            }) => {
                if self.subscription != Some(subscription) {
                    debug!("Ignoring discovery snapshot from stale {subscription}");
                    return;
                }
                self.on_discovery_notification(&children);
            }
            ControllerInput::Transport(TransportEvent::Lifecycle {
                attempt,
                event,
                properties,
            }) => {
                if !properties.is_null() {
                    debug!("{attempt} {event}: {properties}");
                }
                let events = self.slots.on_lifecycle_event(attempt, event);
                self.emit(events);
            }
            ControllerInput::RetryDue { peer, generation } => {
                self.on_retry_due(peer, generation);
            }
        }
    }

    fn on_retry_due(&mut self, peer: PeerId, generation: u64) {
        if !self.slots.fire_retry(peer, generation) {
            return;
        }
        self.emit([TrollEvent::Cancelled { peer }]);

        let Some(request) = self.campaign.as_ref().map(|c| c.request.clone()) else {
            debug!("Campaign stopped before {peer} recharged");
            return;
        };
        if !self.registry.contains(peer) {
            debug!("{}", TrollError::PeerVanished(peer));
            return;
        }
        if let Err(e) = self.slots.begin_attempt(peer, &request) {
            warn!("Could not troll {peer} again: {e}");
        }
    }

    fn emit(&self, events: impl IntoIterator<Item = TrollEvent>) {
        if let Some(campaign) = &self.campaign {
            for event in events {
                campaign.sink.on_event(event);
            }
        }
    }

    fn publish_peers(&self) {
        self.peers_tx.send_replace(self.registry.current_peers());
    }
}

impl Drop for TrollController {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}
