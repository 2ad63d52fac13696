//! ARNav Anchors - 无硬件演示入口
//!
//! 使用模拟适配器跑一遍建图（映射文件为空时）与重定位，输出成功率与恢复建议，Ctrl+C 退出。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arnav_anchors::anchor::{Pose, SimulatedAdapter, SimulatedAnchor, Vec3};
use arnav_anchors::config::load_config;
use arnav_anchors::navigation::default_routes;
use arnav_anchors::{observability, AnchorEvent, AnchorSession, RecoveryAction, RouteId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let route_id: RouteId = config
        .app
        .active_route
        .parse()
        .context("Invalid active_route in config")?;

    let adapter = Arc::new(SimulatedAdapter::new());
    let session = AnchorSession::new(&config, adapter.clone())
        .await
        .context("Failed to create anchor session")?;

    let store = session.store();
    store.load().await;
    if store.mappings_for(route_id).await.is_empty() {
        run_mapping_phase(&session, route_id).await;
    } else {
        restore_simulated_world(&adapter, &session, route_id).await;
    }

    let mut events = session.subscribe();
    if let Err(e) = session.relocalize(route_id).await {
        tracing::error!("Relocalization could not start: {}", e);
        tracing::error!("Advice: {:?}", session.advise_error(&e));
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
            ev = events.recv() => match ev {
                Ok(AnchorEvent::Progress { waypoint_id, state, successful, timed_out, total }) => {
                    tracing::info!(%waypoint_id, ?state, successful, timed_out, total, "Progress");
                }
                Ok(AnchorEvent::BatchComplete { rate, summary }) => {
                    tracing::info!(
                        successful = summary.successful,
                        timed_out = summary.timed_out,
                        failed = summary.failed,
                        total = summary.total,
                        "Batch complete, rate {:.0}%",
                        rate * 100.0
                    );
                    match session.advise(&summary) {
                        RecoveryAction::Proceed => tracing::info!("All anchors tracking, ready to navigate"),
                        action => tracing::warn!(degraded = ?summary.degraded, "Advice: {:?}", action),
                    }
                }
                Ok(AnchorEvent::LateBind { waypoint_id, drift, .. }) => {
                    tracing::info!(%waypoint_id, drift, "Waypoint position corrected");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    let fallback = session.binder().read().await.fallback_count();
    tracing::info!(fallback, "Waypoints still on fallback positions");
    session.stop().await;
    Ok(())
}

/// 在每个勘测坐标处创建锚点
async fn run_mapping_phase(session: &AnchorSession, route_id: RouteId) {
    let routes = default_routes();
    let Some(route) = routes.get(&route_id) else {
        return;
    };
    tracing::info!(route_id = %route_id, waypoints = route.len(), "Mapping phase started");
    for wp in &route.waypoints {
        let pose = Pose::at(wp.fallback_position);
        session
            .recorder()
            .create_and_save(&wp.waypoint_id, route_id, wp.radius, &wp.location_name, &pose)
            .await;
    }
}

/// 把映射文件中的句柄登记到模拟世界（与勘测坐标略有偏差，逐个延迟开始追踪）
async fn restore_simulated_world(adapter: &SimulatedAdapter, session: &AnchorSession, route_id: RouteId) {
    let routes = default_routes();
    for (i, mapping) in session.store().mappings_for(route_id).await.iter().enumerate() {
        let base = routes
            .get(&route_id)
            .and_then(|r| r.get(&mapping.waypoint_id))
            .map_or_else(Vec3::zeros, |w| w.fallback_position);
        adapter.insert_anchor(
            mapping.anchor_handle.as_str(),
            Pose::at(base + Vec3::new(0.3, 0.0, -0.2)),
            SimulatedAnchor::TracksAfter(Duration::from_millis(400 * i as u64)),
        );
    }
}
