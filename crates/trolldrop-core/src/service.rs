//! 串行服务循环
//!
//! 把 [`TrollController`] 移进单个 tokio 任务，命令、发现快照、生命周期事件
//! 和定时器触发都在这里依次处理，控制器状态因此无需加锁。外部通过可克隆的
//! [`TrollHandle`] 发送命令并观察对端列表和运行状态。

use crate::controller::TrollController;
use crate::error::{Result, TrollError};
use crate::event::EventSink;
use crate::peer::Peer;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// 活动启动时对每个对端求值的筛选条件
pub type PeerFilter = Box<dyn Fn(&Peer) -> bool + Send>;

enum Command {
    StartDiscovery(oneshot::Sender<Result<()>>),
    StopDiscovery(oneshot::Sender<()>),
    StartCampaign {
        filter: PeerFilter,
        sink: Arc<dyn EventSink>,
        reply: oneshot::Sender<Result<usize>>,
    },
    StopCampaign(oneshot::Sender<()>),
    SetRecharge(Duration, oneshot::Sender<Duration>),
    SetPayload(PathBuf, oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub struct TrollService;

impl TrollService {
    /// 启动服务循环
    ///
    /// 所有 handle 被丢弃或调用 [`TrollHandle::shutdown`] 后循环结束，结束前会
    /// 停止发现并取消全部槽位。
    pub fn spawn(controller: TrollController) -> (TrollHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = TrollHandle {
            tx,
            peers: controller.subscribe_peers(),
            running: controller.subscribe_running(),
        };
        let task = tokio::spawn(run(controller, rx));
        (handle, task)
    }
}

async fn run(mut controller: TrollController, mut commands: mpsc::Receiver<Command>) {
    debug!("Troll service loop started");
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All handles dropped");
                    break;
                };
                if !handle_command(&mut controller, command) {
                    break;
                }
            }
            Some(input) = controller.next_input() => {
                controller.handle_input(input);
            }
        }
    }
    controller.stop_discovery();
    info!("Troll service stopped");
}

/// 返回 false 表示循环应结束
fn handle_command(controller: &mut TrollController, command: Command) -> bool {
    match command {
        Command::StartDiscovery(reply) => {
            let _ = reply.send(controller.start_discovery());
        }
        Command::StopDiscovery(reply) => {
            controller.stop_discovery();
            let _ = reply.send(());
        }
        Command::StartCampaign {
            filter,
            sink,
            reply,
        } => {
            let _ = reply.send(controller.start_campaign(filter.as_ref(), sink));
        }
        Command::StopCampaign(reply) => {
            controller.stop_campaign();
            let _ = reply.send(());
        }
        Command::SetRecharge(recharge, reply) => {
            let _ = reply.send(controller.set_recharge_duration(recharge));
        }
        Command::SetPayload(payload, reply) => {
            controller.set_payload(payload);
            let _ = reply.send(());
        }
        Command::Shutdown(reply) => {
            controller.stop_discovery();
            let _ = reply.send(());
            return false;
        }
    }
    true
}

/// 服务句柄
#[derive(Clone)]
pub struct TrollHandle {
    tx: mpsc::Sender<Command>,
    peers: watch::Receiver<Vec<Peer>>,
    running: watch::Receiver<bool>,
}

impl TrollHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| TrollError::ServiceClosed)?;
        rx.await.map_err(|_| TrollError::ServiceClosed)
    }

    pub async fn start_discovery(&self) -> Result<()> {
        self.request(Command::StartDiscovery).await?
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        self.request(Command::StopDiscovery).await
    }

    /// 对满足 `filter` 的当前对端开始活动，返回发起的尝试数
    pub async fn start_campaign<F>(&self, filter: F, sink: Arc<dyn EventSink>) -> Result<usize>
    where
        F: Fn(&Peer) -> bool + Send + 'static,
    {
        let filter: PeerFilter = Box::new(filter);
        self.request(|reply| Command::StartCampaign {
            filter,
            sink,
            reply,
        })
        .await?
    }

    pub async fn stop_campaign(&self) -> Result<()> {
        self.request(Command::StopCampaign).await
    }

    /// 返回截断后实际生效的冷却时长
    pub async fn set_recharge_duration(&self, recharge: Duration) -> Result<Duration> {
        self.request(|reply| Command::SetRecharge(recharge, reply))
            .await
    }

    pub async fn set_payload(&self, payload: impl Into<PathBuf>) -> Result<()> {
        let payload = payload.into();
        self.request(|reply| Command::SetPayload(payload, reply))
            .await
    }

    /// 停止发现并结束服务循环，返回时所有尝试和定时器均已取消
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// 对端列表
    pub fn peers(&self) -> watch::Receiver<Vec<Peer>> {
        self.peers.clone()
    }

    /// 活动是否在运行
    pub fn running(&self) -> watch::Receiver<bool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }
}
