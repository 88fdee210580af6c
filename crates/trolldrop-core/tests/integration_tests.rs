//! 集成测试 - 发现与反复发送
//!
//! 通过模拟传输驱动完整的服务循环，时间使用 tokio 的暂停时钟。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use trolldrop_core::{
    AttemptId, ChannelSink, OperationEvent, Peer, PeerDescriptor, PeerId, SimCall, SimTransport,
    TrollController, TrollError, TrollEvent, TrollService,
};

const RECHARGE: Duration = Duration::from_millis(500);
const A: PeerId = PeerId::new(1);
const B: PeerId = PeerId::new(2);

fn descriptors(ids: &[PeerId]) -> Vec<PeerDescriptor> {
    ids.iter()
        .map(|id| PeerDescriptor::new(*id).with_display_name(format!("Device {}", id.raw())))
        .collect()
}

fn spawn_service() -> (Arc<SimTransport>, trolldrop_core::TrollHandle, tokio::task::JoinHandle<()>) {
    let sim = Arc::new(SimTransport::new());
    let controller = TrollController::new(sim.clone(), "/tmp/trollface.png", RECHARGE);
    let (handle, task) = TrollService::spawn(controller);
    (sim, handle, task)
}

/// 让服务循环处理完已排队的输入
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// 发现 {A, B}，只选中 A；等待应答后冷却结束再发一次，停止后不再发送
#[tokio::test(start_paused = true)]
async fn test_end_to_end_scenario() {
    let (sim, handle, task) = spawn_service();
    handle.start_discovery().await.unwrap();

    assert!(sim.announce(descriptors(&[A, B])));
    let mut peers = handle.peers();
    peers.wait_for(|p| p.len() == 2).await.unwrap();

    let (sink, mut events) = ChannelSink::new();
    let started = handle
        .start_campaign(|peer: &Peer| peer.id == A, Arc::new(sink))
        .await
        .unwrap();
    assert_eq!(started, 1);
    assert!(handle.is_running());
    assert_eq!(sim.transfers(), vec![A]);

    // A 显示了请求，冷却结束后应再发一次
    let first = sim.last_attempt(A).unwrap();
    sim.emit(first, OperationEvent::WaitForAnswer);
    tokio::time::sleep(RECHARGE + Duration::from_millis(10)).await;

    assert_eq!(sim.transfers_to(A), 2);
    assert_eq!(sim.transfers_to(B), 0);
    assert!(sim.was_cancelled(first));

    // 第二次冷却结束前停止活动
    let second = sim.last_attempt(A).unwrap();
    assert_ne!(first, second);
    sim.emit(second, OperationEvent::WaitForAnswer);
    settle().await;
    handle.stop_campaign().await.unwrap();
    assert!(!handle.is_running());

    tokio::time::sleep(RECHARGE * 4).await;
    assert_eq!(sim.transfers_to(A), 2);
    assert_eq!(sim.transfers_to(B), 0);
    assert!(sim.was_cancelled(second));

    let mut sent = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.peer(), A);
        if event.counts_as_sent() {
            sent += 1;
        }
    }
    assert_eq!(sent, 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

/// 冷却期间对端消失：槽位被清除，之后不会再发送
#[tokio::test(start_paused = true)]
async fn test_peer_disappearance_stops_restarts() {
    let (sim, handle, _task) = spawn_service();
    handle.start_discovery().await.unwrap();
    sim.announce(descriptors(&[A, B]));
    handle.peers().wait_for(|p| p.len() == 2).await.unwrap();

    let (sink, _events) = ChannelSink::new();
    handle
        .start_campaign(|_: &Peer| true, Arc::new(sink))
        .await
        .unwrap();
    let attempt = sim.last_attempt(A).unwrap();
    sim.emit(attempt, OperationEvent::WaitForAnswer);
    settle().await;

    sim.announce(descriptors(&[B]));
    handle.peers().wait_for(|p| p.len() == 1).await.unwrap();
    assert!(sim.was_cancelled(attempt));

    tokio::time::sleep(RECHARGE * 3).await;
    assert_eq!(sim.transfers_to(A), 1);
    assert_eq!(sim.transfers_to(B), 1);
}

/// 自动应答脚本驱动的活动会按冷却节奏持续发送
#[tokio::test(start_paused = true)]
async fn test_scripted_campaign_keeps_cycling() {
    let sim = Arc::new(SimTransport::new().with_script(vec![
        (Duration::from_millis(50), OperationEvent::Connecting),
        (Duration::from_millis(50), OperationEvent::AskUser),
        (Duration::from_millis(100), OperationEvent::WaitForAnswer),
    ]));
    let controller = TrollController::new(sim.clone(), "/tmp/trollface.png", RECHARGE);
    let (handle, task) = TrollService::spawn(controller);
    handle.start_discovery().await.unwrap();
    sim.announce(descriptors(&[A]));
    handle.peers().wait_for(|p| !p.is_empty()).await.unwrap();

    let (sink, mut events) = ChannelSink::new();
    handle
        .start_campaign(|_: &Peer| true, Arc::new(sink))
        .await
        .unwrap();

    // 每轮 200ms 应答 + 500ms 冷却
    tokio::time::sleep(Duration::from_millis(2_150)).await;
    handle.stop_campaign().await.unwrap();

    assert_eq!(sim.transfers_to(A), 4);
    let first = sim
        .calls()
        .into_iter()
        .find_map(|c| match c {
            SimCall::BeginTransfer { attempt, .. } => Some(attempt),
            _ => None,
        })
        .unwrap();
    assert!(sim.was_resumed(first));

    let mut cancelled = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TrollEvent::Cancelled { .. }) {
            cancelled += 1;
        }
    }
    assert_eq!(cancelled, 3);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

/// 重启发现后，旧订阅排队中的快照不会带回已消失的对端
#[tokio::test]
async fn test_restarted_discovery_ignores_old_snapshots() {
    let (sim, handle, _task) = spawn_service();
    handle.start_discovery().await.unwrap();

    sim.announce(descriptors(&[PeerId::new(7)]));
    handle.stop_discovery().await.unwrap();
    handle.start_discovery().await.unwrap();
    settle().await;
    assert!(handle.peers().borrow().is_empty());

    sim.announce(descriptors(&[A]));
    let mut peers = handle.peers();
    let current = peers.wait_for(|p| !p.is_empty()).await.unwrap().clone();
    assert_eq!(current.iter().map(|p| p.id).collect::<Vec<_>>(), vec![A]);
}

#[tokio::test]
async fn test_unavailable_transport_is_reported() {
    let sim = Arc::new(SimTransport::unavailable());
    let controller = TrollController::new(sim, "/tmp/trollface.png", RECHARGE);
    let (handle, _task) = TrollService::spawn(controller);

    let err = handle.start_discovery().await.unwrap_err();
    assert!(matches!(err, TrollError::TransportUnavailable(_)));

    let (sink, _events) = ChannelSink::new();
    let err = handle
        .start_campaign(|_: &Peer| true, Arc::new(sink))
        .await
        .unwrap_err();
    assert!(matches!(err, TrollError::NotDiscovering));
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let (sim, handle, task) = spawn_service();
    handle.start_discovery().await.unwrap();
    sim.announce(descriptors(&[A, B]));
    handle.peers().wait_for(|p| p.len() == 2).await.unwrap();

    let (sink, _events) = ChannelSink::new();
    handle
        .start_campaign(|_: &Peer| true, Arc::new(sink))
        .await
        .unwrap();
    let attempts = [sim.last_attempt(A).unwrap(), sim.last_attempt(B).unwrap()];

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(attempts.iter().all(|a| sim.was_cancelled(*a)));
    assert!(!sim.is_discovering());
    assert!(matches!(
        handle.stop_campaign().await,
        Err(TrollError::ServiceClosed)
    ));
}

#[tokio::test]
async fn test_dropping_handles_stops_service() {
    let (sim, handle, task) = spawn_service();
    handle.start_discovery().await.unwrap();
    drop(handle);

    task.await.unwrap();
    assert!(!sim.is_discovering());
}

#[tokio::test(start_paused = true)]
async fn test_recharge_update_applies_to_next_timer() {
    let (sim, handle, _task) = spawn_service();
    handle.start_discovery().await.unwrap();
    sim.announce(descriptors(&[A]));
    handle.peers().wait_for(|p| !p.is_empty()).await.unwrap();

    let (sink, _events) = ChannelSink::new();
    handle
        .start_campaign(|_: &Peer| true, Arc::new(sink))
        .await
        .unwrap();
    let applied = handle
        .set_recharge_duration(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(applied, Duration::from_secs(2));

    sim.emit(sim.last_attempt(A).unwrap(), OperationEvent::WaitForAnswer);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sim.transfers_to(A), 1);

    tokio::time::sleep(Duration::from_millis(1_010)).await;
    assert_eq!(sim.transfers_to(A), 2);
}

/// 任意事件序列下，同一对端至多一个存活的尝试
#[tokio::test(start_paused = true)]
async fn test_single_slot_invariant_under_random_events() {
    const EVENTS: [OperationEvent; 8] = [
        OperationEvent::AskUser,
        OperationEvent::WaitForAnswer,
        OperationEvent::Started,
        OperationEvent::Progress,
        OperationEvent::Canceled,
        OperationEvent::Finished,
        OperationEvent::Blocked,
        OperationEvent::ErrorOccurred,
    ];
    let peers = [PeerId::new(1), PeerId::new(2), PeerId::new(3)];
    let mut rng = StdRng::seed_from_u64(0x7011);

    let sim = Arc::new(SimTransport::new());
    let mut controller = TrollController::new(sim.clone(), "/tmp/trollface.png", RECHARGE);
    controller.start_discovery().unwrap();
    sim.announce(descriptors(&peers));
    controller.pump();

    let mut ended: HashSet<AttemptId> = HashSet::new();
    for step in 0..400 {
        match rng.gen_range(0..10) {
            0..=5 => {
                let peer = peers[rng.gen_range(0..peers.len())];
                if let Some(attempt) = sim.last_attempt(peer) {
                    let event = EVENTS[rng.gen_range(0..EVENTS.len())];
                    if sim.emit(attempt, event) && event.is_terminal() {
                        ended.insert(attempt);
                    }
                }
            }
            6 => {
                let visible: Vec<PeerId> = peers
                    .iter()
                    .copied()
                    .filter(|_| rng.gen_bool(0.7))
                    .collect();
                sim.announce(descriptors(&visible));
            }
            7 => {
                if controller.is_running() {
                    controller.stop_campaign();
                } else {
                    let (sink, _events) = ChannelSink::new();
                    let _ = controller.start_campaign(&|_: &Peer| true, Arc::new(sink));
                }
            }
            _ => {
                let millis = rng.gen_range(0..=2 * RECHARGE.as_millis() as u64);
                tokio::time::sleep(Duration::from_millis(millis)).await;
            }
        }
        controller.pump();

        let mut live: HashMap<PeerId, usize> = HashMap::new();
        for call in sim.calls() {
            if let SimCall::BeginTransfer { peer, attempt } = call {
                if !sim.was_cancelled(attempt) && !ended.contains(&attempt) {
                    *live.entry(peer).or_default() += 1;
                }
            }
        }
        for (peer, count) in live {
            assert!(count <= 1, "step {step}: {peer} has {count} live attempts");
        }
    }
}
