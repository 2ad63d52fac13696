use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use super::*;
use crate::anchor::{AnchorHandle, Pose, SimulatedAdapter, SimulatedAnchor, TransformTable, Vec3};
use crate::core::AnchorError;
use crate::events::{AnchorEvent, EventBus};
use crate::store::AnchorMapping;

fn mapping(id: &str, handle: &str) -> AnchorMapping {
    AnchorMapping {
        waypoint_id: id.to_string(),
        anchor_handle: AnchorHandle::new(handle),
        radius: 2.5,
        location_name: String::new(),
    }
}

/// A：2 秒后追踪；B：永不追踪（或 32 秒后追踪）；C：加载失败
fn scenario_adapter(b: SimulatedAnchor) -> Arc<SimulatedAdapter> {
    Arc::new(
        SimulatedAdapter::new()
            .with_anchor(
                "h-a",
                Pose::at(Vec3::new(-7.0, 0.0, 0.0)),
                SimulatedAnchor::TracksAfter(Duration::from_secs(2)),
            )
            .with_anchor("h-b", Pose::at(Vec3::new(-20.0, 0.0, 4.0)), b)
            .with_anchor("h-c", Pose::at(Vec3::new(-20.0, 0.0, 0.0)), SimulatedAnchor::LoadFails),
    )
}

fn scenario_mappings() -> Vec<AnchorMapping> {
    vec![
        mapping("WP01", "h-a"),
        mapping("WP02", "h-b"),
        mapping("WP03", "h-c"),
    ]
}

fn coordinator(adapter: Arc<SimulatedAdapter>) -> RelocalizationCoordinator {
    RelocalizationCoordinator::new(
        adapter,
        RelocSettings::default(),
        EventBus::new(64),
        TransformTable::new(),
    )
}

/// 收集事件直到 BatchComplete
async fn until_complete(
    rx: &mut broadcast::Receiver<AnchorEvent>,
    log: &mut Vec<AnchorEvent>,
) -> (f32, RelocSummary) {
    loop {
        match rx.recv().await.unwrap() {
            AnchorEvent::BatchComplete { rate, summary } => return (rate, summary),
            other => log.push(other),
        }
    }
}

fn progress_states(log: &[AnchorEvent], waypoint: &str) -> Vec<RelocState> {
    log.iter()
        .filter_map(|e| match e {
            AnchorEvent::Progress {
                waypoint_id, state, ..
            } if waypoint_id == waypoint => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_mixed_batch_classification() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();
    let started = Instant::now();

    coord.start_batch(scenario_mappings()).await.unwrap();
    let mut log = Vec::new();
    let (rate, summary) = until_complete(&mut rx, &mut log).await;

    assert!((rate - 1.0 / 3.0).abs() < 1e-3);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.degraded, vec!["WP02".to_string(), "WP03".to_string()]);
    assert!(started.elapsed() >= Duration::from_secs(30));

    let counters = coord.counters().await;
    assert_eq!(counters.processed, 3);
    assert_eq!(counters.total, 3);
    assert!(counters.is_consistent());
    assert!(coord.is_relocalized().await);

    assert_eq!(
        progress_states(&log, "WP01"),
        vec![RelocState::Pending, RelocState::Tracking]
    );
    assert_eq!(
        progress_states(&log, "WP02"),
        vec![RelocState::Pending, RelocState::TimedOut]
    );
    assert_eq!(progress_states(&log, "WP03"), vec![RelocState::LoadFailed]);

    let a = coord.result("WP01").await.unwrap();
    assert_eq!(a.elapsed, 2.0);
    let b = coord.result("WP02").await.unwrap();
    assert_eq!(b.elapsed, 30.0);

    assert_eq!(coord.anchor_position("WP01"), Some(Vec3::new(-7.0, 0.0, 0.0)));
    assert!(coord.transform_for("WP02").is_none());
    assert!(coord.reanchor_running().await);

    coord.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_progress_counters_never_exceed_total() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter);
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    loop {
        let event = rx.recv().await.unwrap();
        assert!(coord.counters().await.is_consistent());
        match event {
            AnchorEvent::Progress {
                successful,
                timed_out,
                total,
                ..
            } => assert!(successful + timed_out <= total),
            AnchorEvent::BatchComplete { .. } => break,
            _ => {}
        }
    }
    coord.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_recovery_after_one_sweep() {
    let adapter = scenario_adapter(SimulatedAnchor::TracksAfter(Duration::from_secs(32)));
    let coord = coordinator(adapter);
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    let mut log = Vec::new();
    let (_, summary) = until_complete(&mut rx, &mut log).await;
    assert_eq!(summary.timed_out, 1);

    let completed_at = Instant::now();
    let recovered = match rx.recv().await.unwrap() {
        AnchorEvent::LateRecovered {
            waypoint_id,
            transform,
        } => {
            assert_eq!(transform.position(), Some(Vec3::new(-20.0, 0.0, 4.0)));
            waypoint_id
        }
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(recovered, "WP02");
    let waited = completed_at.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));

    let counters = coord.counters().await;
    assert_eq!(counters.successful, 2);
    assert_eq!(counters.timed_out, 0);
    assert_eq!(counters.failed, 1);
    assert!(counters.is_consistent());
    assert_eq!(coord.result("WP02").await.unwrap().state, RelocState::Tracking);
    assert!(coord.transform_for("WP02").is_some());

    // 循环已自行结束，不再有事件
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!coord.reanchor_running().await);
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_keeps_running_while_failing() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    until_complete(&mut rx, &mut Vec::new()).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(coord.reanchor_running().await);
    assert_eq!(coord.counters().await.timed_out, 1);

    // 锚点终于可追踪，下一次扫描即恢复
    adapter.set_behavior("h-b", SimulatedAnchor::TracksAfter(Duration::ZERO));
    loop {
        if let AnchorEvent::LateRecovered { waypoint_id, .. } = rx.recv().await.unwrap() {
            assert_eq!(waypoint_id, "WP02");
            break;
        }
    }
    assert_eq!(coord.counters().await.successful, 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_completes_immediately() {
    let adapter = Arc::new(SimulatedAdapter::new());
    adapter.set_available(false);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(Vec::new()).await.unwrap();

    match rx.try_recv().unwrap() {
        AnchorEvent::BatchComplete { rate, summary } => {
            assert_eq!(rate, 1.0);
            assert_eq!(summary.total, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(adapter.load_calls(), 0);
    assert!(coord.is_relocalized().await);
    assert!(!coord.reanchor_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_adapter_unavailable_aborts_batch() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    adapter.set_available(false);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    let err = coord.start_batch(scenario_mappings()).await.unwrap_err();
    assert!(matches!(err, AnchorError::AdapterUnavailable));
    assert_eq!(adapter.load_calls(), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(coord.counters().await, RelocCounters::default());
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_noop_when_all_tracking() {
    let adapter = Arc::new(SimulatedAdapter::new().with_anchor(
        "h-a",
        Pose::at(Vec3::zeros()),
        SimulatedAnchor::TracksAfter(Duration::ZERO),
    ));
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(vec![mapping("WP01", "h-a")]).await.unwrap();
    until_complete(&mut rx, &mut Vec::new()).await;
    let before = coord.counters().await;
    let loads = adapter.load_calls();

    coord.retry_failed().await.unwrap();
    coord.retry_failed().await.unwrap();

    assert_eq!(coord.counters().await, before);
    assert_eq!(adapter.load_calls(), loads);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_load_failed_recovers_only_through_retry() {
    let adapter = scenario_adapter(SimulatedAnchor::TracksAfter(Duration::from_secs(1)));
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    until_complete(&mut rx, &mut Vec::new()).await;
    assert_eq!(coord.result("WP03").await.unwrap().state, RelocState::LoadFailed);

    // 后台补救不会碰 LoadFailed / Tracking 条目
    assert!(!coord.late_recover("WP03").await);
    assert!(!coord.late_recover("WP01").await);
    assert_eq!(coord.counters().await.failed, 1);

    adapter.set_behavior("h-c", SimulatedAnchor::TracksAfter(Duration::ZERO));
    coord.retry_failed().await.unwrap();

    let mut log = Vec::new();
    let (rate, summary) = until_complete(&mut rx, &mut log).await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.successful, 3);
    assert_eq!(rate, 1.0);
    assert_eq!(
        progress_states(&log, "WP03"),
        vec![RelocState::Pending, RelocState::Tracking]
    );
    // 已追踪的 WP01 不会被重新加载
    assert!(progress_states(&log, "WP01").is_empty());

    let counters = coord.counters().await;
    assert_eq!(counters.processed, counters.total);
    assert!(counters.is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_retry_ignored_while_batch_running() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());

    coord.start_batch(scenario_mappings()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let before = coord.counters().await;
    assert!(before.processed < before.total);

    coord.retry_failed().await.unwrap();
    assert_eq!(coord.counters().await, before);
    coord.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_stop_mid_batch() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    coord.stop().await;
    let at_stop = coord.counters().await;
    assert_eq!(at_stop.successful, 1);
    assert_eq!(at_stop.failed, 1);
    assert_eq!(at_stop.processed, 2);
    assert_eq!(coord.result("WP02").await.unwrap().state, RelocState::Pending);

    adapter.set_behavior("h-b", SimulatedAnchor::TracksAfter(Duration::ZERO));
    adapter.set_behavior("h-c", SimulatedAnchor::TracksAfter(Duration::ZERO));
    let loads = adapter.load_calls();
    coord.retry_failed().await.unwrap();

    let mut log = Vec::new();
    let (rate, summary) = until_complete(&mut rx, &mut log).await;
    assert_eq!(rate, 1.0);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.successful, 3);
    assert!(summary.degraded.is_empty());
    // 被中断的 WP02 与加载失败的 WP03 各重新加载一次
    assert_eq!(adapter.load_calls(), loads + 2);
    assert_eq!(
        progress_states(&log, "WP02").last(),
        Some(&RelocState::Tracking)
    );

    let counters = coord.counters().await;
    assert_eq!(counters.processed, counters.total);
    assert!(counters.is_consistent());
    assert!(coord.is_relocalized().await);
    coord.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_polling() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter);
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    coord.stop().await;
    let at_stop = coord.counters().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(coord.counters().await, at_stop);
    assert!(!coord.is_relocalized().await);
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, AnchorEvent::BatchComplete { .. }));
    }

    // 空闲时再次 stop 无副作用
    coord.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_background_loop() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    until_complete(&mut rx, &mut Vec::new()).await;
    assert!(coord.reanchor_running().await);

    coord.stop().await;
    assert!(!coord.reanchor_running().await);
    adapter.set_behavior("h-b", SimulatedAnchor::TracksAfter(Duration::ZERO));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(coord.counters().await.timed_out, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_empty_handle_and_duplicates() {
    let adapter = Arc::new(SimulatedAdapter::new().with_anchor(
        "h-a",
        Pose::at(Vec3::zeros()),
        SimulatedAnchor::TracksAfter(Duration::ZERO),
    ));
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord
        .start_batch(vec![
            mapping("WP01", "h-a"),
            mapping("WP02", ""),
            mapping("WP01", "h-other"),
        ])
        .await
        .unwrap();
    let (_, summary) = until_complete(&mut rx, &mut Vec::new()).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.degraded, vec!["WP02".to_string()]);
    assert_eq!(adapter.load_calls(), 1);
    assert!(!coord.reanchor_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_new_batch_resets_previous_results() {
    let adapter = scenario_adapter(SimulatedAnchor::NeverTracks);
    let coord = coordinator(adapter.clone());
    let mut rx = coord.subscribe();

    coord.start_batch(scenario_mappings()).await.unwrap();
    until_complete(&mut rx, &mut Vec::new()).await;
    assert!(coord.transform_for("WP01").is_some());

    coord.start_batch(vec![mapping("WP03", "h-c")]).await.unwrap();
    let (_, summary) = until_complete(&mut rx, &mut Vec::new()).await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.failed, 1);
    assert!(coord.result("WP01").await.is_none());
    assert!(!coord.reanchor_running().await);
}
