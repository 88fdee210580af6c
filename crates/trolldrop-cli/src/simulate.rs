//! `simulate` 子命令：在进程内模拟传输上跑一次完整活动

use anyhow::{Context, Result, bail};
use clap::Args;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use trolldrop_core::{
    ChannelSink, OperationEvent, Peer, PeerDescriptor, PeerId, SimTransport, TrollController,
    TrollError, TrollEvent, TrollService, TrollSettings,
};

#[derive(Args)]
pub struct SimulateArgs {
    /// 模拟出现的设备名称
    #[arg(long, value_delimiter = ',', default_value = "Alice,Bob")]
    pub peers: Vec<String>,

    /// 选中的设备名称 (默认全部)
    #[arg(short, long, value_delimiter = ',')]
    pub target: Vec<String>,

    /// 冷却时长 (秒, 覆盖设置文件)
    #[arg(short, long, value_parser = crate::parse_recharge)]
    pub recharge: Option<Duration>,

    /// 发送的文件 (覆盖设置文件)
    #[arg(short, long)]
    pub payload: Option<PathBuf>,

    /// 运行时长 (秒)
    #[arg(short, long, default_value_t = 5)]
    pub duration: u64,
}

/// 模拟对端的应答节奏：连接、弹出请求、等待应答
fn responder_script() -> Vec<(Duration, OperationEvent)> {
    vec![
        (Duration::from_millis(150), OperationEvent::Connecting),
        (Duration::from_millis(150), OperationEvent::AskUser),
        (Duration::from_millis(300), OperationEvent::WaitForAnswer),
    ]
}

pub async fn run(args: SimulateArgs, settings: &TrollSettings) -> Result<()> {
    let payload = args
        .payload
        .or_else(|| settings.payload.clone())
        .unwrap_or_else(|| PathBuf::from("trollface.png"));
    let recharge = args.recharge.unwrap_or_else(|| settings.recharge_duration());

    let sim = Arc::new(SimTransport::new().with_script(responder_script()));
    let controller = TrollController::new(sim.clone(), payload.clone(), recharge);
    let (handle, task) = TrollService::spawn(controller);

    handle
        .start_discovery()
        .await
        .context("Failed to start discovery")?;

    let descriptors: Vec<PeerDescriptor> = args
        .peers
        .iter()
        .enumerate()
        .map(|(i, name)| PeerDescriptor::new(PeerId::new(i as u64 + 1)).with_display_name(name))
        .collect();
    let expected = descriptors.len();
    sim.announce(descriptors);

    let mut peer_rx = handle.peers();
    let peers = peer_rx
        .wait_for(|p| p.len() == expected)
        .await
        .context("Service stopped before peers appeared")?
        .clone();

    println!("📡 发现 {} 台设备:", peers.len());
    for peer in &peers {
        let mark = if is_target(&args.target, peer) { "✔" } else { " " };
        println!("   [{mark}] {}", peer.label());
    }

    let device_name = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown".to_string());
    println!("ℹ️  对方看到的发送者名称: {device_name}");
    println!(
        "📁 文件: {}  ⏱  冷却: {:.1}s",
        payload.display(),
        recharge.as_secs_f64()
    );

    let (sink, mut events) = ChannelSink::new();
    let targets = args.target.clone();
    let started = match handle
        .start_campaign(move |peer: &Peer| is_target(&targets, peer), Arc::new(sink))
        .await
    {
        Ok(started) => started,
        Err(TrollError::NoEligiblePeers) => bail!("没有选中任何设备"),
        Err(e) => return Err(e.into()),
    };
    info!("Campaign started on {} peer(s)", started);

    let labels: HashMap<PeerId, String> = peers
        .iter()
        .map(|p| (p.id, p.label().to_string()))
        .collect();
    let label = |id: PeerId| labels.get(&id).cloned().unwrap_or_else(|| id.to_string());

    let mut sent = 0usize;
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            Some(event) = events.recv() => {
                if event.counts_as_sent() {
                    sent += 1;
                }
                match event {
                    TrollEvent::Lifecycle { peer, event } => {
                        debug!("{} -> {}", label(peer), event);
                    }
                    TrollEvent::AttemptCompleted { peer, event } => {
                        println!("🏁 {}: {}", label(peer), event);
                    }
                    TrollEvent::Cancelled { peer } => {
                        println!("🔁 {}: 撤回并重新发送 (已发送 {sent})", label(peer));
                    }
                }
            }
        }
    }

    handle.stop_campaign().await?;
    handle.shutdown().await?;
    task.await?;

    println!("📤 共发送 {sent} 次");
    Ok(())
}

fn is_target(targets: &[String], peer: &Peer) -> bool {
    targets.is_empty() || targets.iter().any(|t| t == peer.label())
}
